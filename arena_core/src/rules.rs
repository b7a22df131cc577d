// The per-game collaborator.
//
// `GameRules` is everything the core needs from a game: its schema, its
// handler bindings and its lifecycle hooks. The core never implements game
// semantics itself. Hooks run with the session's `GameContext` under the same
// rollback-on-fault guard as order handlers (see `context::guarded`).
//
// A `GameFactory` is registered with the server and builds a fresh rules
// instance for every session it creates.

use crate::context::GameContext;
use crate::dispatch::DispatchTableBuilder;
use crate::error::HandlerError;
use crate::schema::GameSchema;

/// How a game ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Winning seats. Empty means a draw.
    pub winners: Vec<usize>,
    pub reason: String,
}

impl Outcome {
    pub fn win(seat: usize, reason: impl Into<String>) -> Self {
        Self {
            winners: vec![seat],
            reason: reason.into(),
        }
    }

    pub fn draw(reason: impl Into<String>) -> Self {
        Self {
            winners: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn is_draw(&self) -> bool {
        self.winners.is_empty()
    }
}

pub trait GameRules: Send {
    fn schema(&self) -> GameSchema;

    /// Bind a handler to every function the schema declares.
    fn bind(&self, builder: &mut DispatchTableBuilder);

    /// Set up the initial game state once every seat is ready.
    fn start(&mut self, ctx: &mut GameContext) -> Result<(), HandlerError>;

    fn before_turn(&mut self, _ctx: &mut GameContext, _seat: usize) -> Result<(), HandlerError> {
        Ok(())
    }

    fn after_turn(&mut self, _ctx: &mut GameContext, _seat: usize) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Real-time sessions only: advance the simulation by one tick.
    fn tick(&mut self, _ctx: &mut GameContext) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Consulted after every action, turn and tick. `Some` ends the game.
    fn outcome(&self, ctx: &GameContext) -> Option<Outcome>;

    fn max_turns_reached(&self, _ctx: &GameContext) -> Outcome {
        Outcome::draw("Turn limit reached")
    }
}

pub trait GameFactory: Send + Sync {
    fn game_name(&self) -> &str;

    fn create(&self) -> Box<dyn GameRules>;
}
