// Nim: players take turns removing 1 to `maxTake` stones from a shared pile;
// whoever takes the last stone wins.
//
// Small on purpose. It exercises every part of the rules interface: game
// attributes, a class hierarchy with object references (`opponent`,
// `lastMover`), one callable function with a typed argument and a boolean
// return with distinct default and invalid values, a validator, turn hooks
// and an outcome check.
//
// Each seat gets a `Player` object at start; orders are `take` calls on the
// caller's own player object.

use arena_core::{
    AttributeSchema, Call, ClassSchema, DispatchTableBuilder, FieldSchema, FunctionSchema,
    GameContext, GameFactory, GameRules, GameSchema, HandlerError, ObjectId, Outcome,
    ReturnSchema, TypeSpec, Value,
};
use serde_json::json;

pub const GAME_NAME: &str = "Nim";

const STONES: &str = "stones";
const MAX_TAKE: &str = "maxTake";
const PLAYERS: &str = "players";
const LAST_MOVER: &str = "lastMover";
const TOOK_THIS_TURN: &str = "tookThisTurn";
const LOG: &str = "log";

pub fn schema() -> GameSchema {
    GameSchema::new(GAME_NAME)
        .game_attribute(STONES, AttributeSchema::with_default(TypeSpec::Int, json!(15)))
        .game_attribute(MAX_TAKE, AttributeSchema::with_default(TypeSpec::Int, json!(3)))
        .game_attribute(
            PLAYERS,
            AttributeSchema::new(TypeSpec::list(TypeSpec::object("Player"))),
        )
        .game_attribute(LAST_MOVER, AttributeSchema::new(TypeSpec::nullable_object("Player")))
        .game_attribute(TOOK_THIS_TURN, AttributeSchema::new(TypeSpec::Boolean))
        .game_attribute(LOG, AttributeSchema::new(TypeSpec::list(TypeSpec::String)))
        .class("GameObject", ClassSchema::new())
        .class(
            "Player",
            ClassSchema::new()
                .extends("GameObject")
                .attribute("name", AttributeSchema::new(TypeSpec::String))
                .attribute("seat", AttributeSchema::new(TypeSpec::Int))
                .attribute("taken", AttributeSchema::new(TypeSpec::Int))
                .attribute("opponent", AttributeSchema::new(TypeSpec::nullable_object("Player")))
                .function(
                    "take",
                    FunctionSchema::new(
                        vec![FieldSchema::required("count", TypeSpec::Int)],
                        ReturnSchema::new(TypeSpec::Boolean, json!(true), json!(false)),
                    ),
                ),
        )
}

#[derive(Debug, Default)]
pub struct Nim;

impl GameRules for Nim {
    fn schema(&self) -> GameSchema {
        schema()
    }

    fn bind(&self, builder: &mut DispatchTableBuilder) {
        builder
            .handler("Player", "take", take)
            .validator("Player", "take", check_take);
    }

    fn start(&mut self, ctx: &mut GameContext) -> Result<(), HandlerError> {
        let mut players: Vec<ObjectId> = Vec::new();
        for seat in 0..ctx.seat_count() {
            let player = ctx.create_object("Player")?;
            let name = ctx.seat_name(seat).unwrap_or_default();
            ctx.set_attr(&player, "name", name)?;
            ctx.set_attr(&player, "seat", seat)?;
            ctx.set_seat_object(seat, &player)?;
            ctx.push_game_attr(PLAYERS, &player)?;
            players.push(player);
        }
        for (i, player) in players.iter().enumerate() {
            if let Some(next) = players.get((i + 1) % players.len()).filter(|p| *p != player) {
                ctx.set_attr(player, "opponent", next)?;
            }
        }
        tracing::debug!("nim: {} players, {:?} stones", players.len(), ctx.game_attr(STONES));
        Ok(())
    }

    fn before_turn(&mut self, ctx: &mut GameContext, _seat: usize) -> Result<(), HandlerError> {
        ctx.set_game_attr(TOOK_THIS_TURN, false)
    }

    fn tick(&mut self, ctx: &mut GameContext) -> Result<(), HandlerError> {
        ctx.set_game_attr(TOOK_THIS_TURN, false)
    }

    fn outcome(&self, ctx: &GameContext) -> Option<Outcome> {
        if int_attr(ctx, STONES) > 0 {
            return None;
        }
        let last = ctx.game_attr(LAST_MOVER)?.as_object()?.clone();
        let seat = usize::try_from(ctx.attr(&last, "seat")?.as_int()?).ok()?;
        let name = ctx.seat_name(seat).unwrap_or_default();
        Some(Outcome::win(seat, format!("{name} took the last stone")))
    }
}

fn int_attr(ctx: &GameContext, name: &str) -> i64 {
    ctx.game_attr(name).and_then(|v| v.as_int()).unwrap_or(0)
}

fn check_take(ctx: &GameContext, call: &Call<'_>) -> Option<String> {
    if ctx.seat_object(call.seat).as_ref() != Some(call.this) {
        return Some("that is not your player".into());
    }
    if ctx
        .game_attr(TOOK_THIS_TURN)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return Some("you already took stones this turn".into());
    }
    let count = call.int("count").unwrap_or(0);
    let limit = int_attr(ctx, MAX_TAKE).min(int_attr(ctx, STONES));
    if !(1..=limit).contains(&count) {
        return Some(format!("you may take between 1 and {limit} stones"));
    }
    None
}

fn take(ctx: &mut GameContext, call: &Call<'_>) -> Result<Option<Value>, HandlerError> {
    let count = call.int("count").unwrap_or(0);
    let stones = int_attr(ctx, STONES);
    ctx.set_game_attr(STONES, stones - count)?;

    let taken = ctx
        .attr(call.this, "taken")
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    ctx.set_attr(call.this, "taken", taken + count)?;
    ctx.set_game_attr(LAST_MOVER, call.this)?;
    ctx.set_game_attr(TOOK_THIS_TURN, true)?;

    let name = ctx
        .attr(call.this, "name")
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    ctx.push_game_attr(LOG, format!("{name} took {count}"))?;
    Ok(None)
}

#[derive(Debug, Default)]
pub struct NimFactory;

impl GameFactory for NimFactory {
    fn game_name(&self) -> &str {
        GAME_NAME
    }

    fn create(&self) -> Box<dyn GameRules> {
        Box::new(Nim)
    }
}
