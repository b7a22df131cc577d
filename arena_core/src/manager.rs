// Session state machine.
//
// `GameManager` owns one session: the game's rules, its dispatch table, the
// `GameContext` (graph + registry) and the per-client bookkeeping. The server
// drives it from a single thread, one event at a time; nothing here locks.
//
// Lifecycle: `Waiting` (players take seats, mark ready) -> `Running` (orders,
// turns or ticks) -> `Over` (terminal). The phase is mirrored into the graph
// at `session/phase` so clients see it change.
//
// Orders: every check that can reject an order runs before any mutation
// (phase, seat, turn, object, function, every argument cast, the validator).
// The handler then runs inside `context::guarded`, so a fault rolls back the
// graph and registry and the session carries on. A structural error is fatal:
// the session ends and the server tears it down.
//
// Delta distribution: after each accepted event the graph's pending deltas
// are appended to a shared log. Each client has its own cursor into it;
// `flush_deltas_for` hands out whatever the client hasn't seen yet. The log's
// prefix is dropped once every cursor has passed it. A joining client gets a
// snapshot plus a cursor at the log head, so its mirror starts consistent.
//
// Turn timing (turn-based mode): the server reports elapsed time with
// `elapse`; the manager charges the active seat's time bank and tells the
// server when it ran out. Banks are synced into `session/players/<seat>/
// timeRemaining` when the turn passes, not on every charge.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arena_protocol::types::{ClientId, ClientRole, ObjectId, WireValue};

use crate::context::{self, GameContext, Phase};
use crate::delta::Delta;
use crate::dispatch::{Call, DispatchTable};
use crate::error::{HandlerError, JoinError, OrderError};
use crate::rules::{GameRules, Outcome};
use crate::schema::ReturnSchema;
use crate::serializer;
use crate::settings::GameSettings;
use crate::value::Value;

/// Result of a successful `connect`.
#[derive(Clone, Debug, PartialEq)]
pub struct Joined {
    pub client: ClientId,
    pub seat: Option<usize>,
    /// Full state to seed the client's mirror; later deltas apply on top.
    pub snapshot: WireValue,
}

/// Value returned to the caller of an accepted order.
#[derive(Clone, Debug, PartialEq)]
pub struct Returned {
    pub value: WireValue,
    /// Set when the order was judged invalid (`value` is then the declared
    /// invalid value).
    pub invalid: Option<String>,
}

#[derive(Debug)]
struct ClientSlot {
    name: String,
    role: ClientRole,
    seat: Option<usize>,
    /// Absolute log position of the first delta this client hasn't seen.
    cursor: u64,
    fault_reason: Option<String>,
}

pub struct GameManager {
    rules: Box<dyn GameRules>,
    dispatch: DispatchTable,
    ctx: GameContext,
    phase: Phase,
    over_reason: Option<String>,
    /// Set when the session ended on an unrecoverable error.
    failed: bool,
    clients: BTreeMap<ClientId, ClientSlot>,
    next_client: u32,
    /// Committed deltas not yet seen by every client.
    log: Vec<Delta>,
    /// Absolute position of `log[0]`.
    log_base: u64,
    /// Time charged to the active seat in the current turn.
    spent_ms: u64,
}

impl std::fmt::Debug for GameManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameManager")
            .field("game", &self.ctx.schema().name)
            .field("phase", &self.phase)
            .field("clients", &self.clients.len())
            .field("log", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl GameManager {
    /// Set up a session for `rules`. Fails if the schema is inconsistent or
    /// the handler bindings don't match it.
    pub fn new(rules: Box<dyn GameRules>, settings: GameSettings) -> Result<Self, HandlerError> {
        let schema = rules.schema();
        schema.validate()?;
        let mut builder = DispatchTable::builder();
        rules.bind(&mut builder);
        let dispatch = builder.build(&schema)?;
        let mut ctx = GameContext::new(Arc::new(schema), settings)?;
        // The initial layout reaches clients through their join snapshot.
        ctx.flush();
        Ok(Self {
            rules,
            dispatch,
            ctx,
            phase: Phase::Waiting,
            over_reason: None,
            failed: false,
            clients: BTreeMap::new(),
            next_client: 0,
            log: Vec::new(),
            log_base: 0,
            spent_ms: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn over_reason(&self) -> Option<&str> {
        self.over_reason.as_deref()
    }

    /// True once the session has ended on an unrecoverable error rather
    /// than by the game's rules.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn game_name(&self) -> &str {
        &self.ctx.schema().name
    }

    pub fn context(&self) -> &GameContext {
        &self.ctx
    }

    pub fn settings(&self) -> &GameSettings {
        self.ctx.settings()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_name(&self, client: ClientId) -> Option<&str> {
        self.clients.get(&client).map(|slot| slot.name.as_str())
    }

    pub fn client_role(&self, client: ClientId) -> Option<ClientRole> {
        self.clients.get(&client).map(|slot| slot.role)
    }

    pub fn client_seat(&self, client: ClientId) -> Option<usize> {
        self.clients.get(&client).and_then(|slot| slot.seat)
    }

    /// Reason of the client's last faulted order, if any.
    pub fn fault_reason(&self, client: ClientId) -> Option<&str> {
        self.clients
            .get(&client)
            .and_then(|slot| slot.fault_reason.as_deref())
    }

    pub fn active_player(&self) -> Option<usize> {
        self.ctx.active_player()
    }

    /// Remaining time bank of `seat`, including time charged this turn.
    pub fn time_remaining(&self, seat: usize) -> Option<Duration> {
        let bank = self.ctx.time_remaining_ms(seat)?;
        let spent = if self.ctx.active_player() == Some(seat) {
            self.spent_ms
        } else {
            0
        };
        Some(Duration::from_millis(bank.saturating_sub(spent)))
    }

    /// How long the active seat may still think, when a turn clock is
    /// running.
    pub fn turn_deadline(&self) -> Option<Duration> {
        if self.phase != Phase::Running || !self.settings().is_turn_based() {
            return None;
        }
        self.time_remaining(self.ctx.active_player()?)
    }

    /// Full current state in wire form.
    pub fn snapshot(&self) -> WireValue {
        self.ctx.graph().snapshot()
    }

    /// Number of committed deltas still retained for lagging clients.
    pub fn retained_deltas(&self) -> usize {
        self.log.len()
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    /// Admit a client. Players take the next free seat and may only join
    /// while the session is waiting; spectators may join at any time.
    pub fn connect(&mut self, name: &str, role: ClientRole) -> Result<Joined, JoinError> {
        let seat = match role {
            ClientRole::Spectator => None,
            ClientRole::Player => {
                match self.phase {
                    Phase::Waiting => {}
                    Phase::Running => return Err(JoinError::AlreadyStarted),
                    Phase::Over => return Err(JoinError::Over),
                }
                if self.ctx.seat_count() >= self.settings().required_players {
                    return Err(JoinError::Full);
                }
                match self.ctx.add_seat(name) {
                    Ok(seat) => Some(seat),
                    Err(err) => {
                        self.fail(&err);
                        return Err(JoinError::Over);
                    }
                }
            }
        };
        self.commit();

        let client = ClientId(self.next_client);
        self.next_client += 1;
        self.clients.insert(
            client,
            ClientSlot {
                name: name.to_owned(),
                role,
                seat,
                cursor: self.log_head(),
                fault_reason: None,
            },
        );
        tracing::info!(
            "{}: {client} joined as {name} ({})",
            self.game_name(),
            seat.map_or_else(|| "spectator".to_owned(), |s| format!("seat {s}"))
        );
        Ok(Joined {
            client,
            seat,
            snapshot: self.snapshot(),
        })
    }

    /// Mark a seated client ready. Starts the game once every seat is filled
    /// and ready.
    pub fn ready(&mut self, client: ClientId) -> Result<(), OrderError> {
        let seat = self.client_seat(client).ok_or(OrderError::NotAPlayer)?;
        match self.phase {
            Phase::Waiting => {}
            Phase::Running => return Ok(()),
            Phase::Over => return Err(OrderError::NotRunning),
        }
        let result = self.mark_ready(seat);
        self.settle(result)?;

        let seats = self.ctx.seat_count();
        let all_ready = (0..seats).all(|s| self.seat_flag(s, "ready"));
        if seats == self.settings().required_players && all_ready {
            let result = self.start();
            self.settle(result)?;
        }
        Ok(())
    }

    fn mark_ready(&mut self, seat: usize) -> Result<(), HandlerError> {
        self.ctx.set_seat_field(seat, "ready", Value::Bool(true))?;
        self.sync_ready_count()
    }

    fn sync_ready_count(&mut self) -> Result<(), HandlerError> {
        let ready = (0..self.ctx.seat_count())
            .filter(|&s| self.seat_flag(s, "ready"))
            .count();
        self.ctx.set_session("playersReady", Value::from(ready))
    }

    /// Remove a client. Returns its name if it was connected.
    ///
    /// A player leaving before the game starts gives up its seat (later seats
    /// move up). During the game the seat stays, marked disconnected and lost;
    /// if it held the turn, the turn passes.
    pub fn disconnect(&mut self, client: ClientId) -> Option<String> {
        let slot = self.clients.remove(&client)?;
        tracing::info!("{}: {client} ({}) left", self.game_name(), slot.name);
        if let Some(seat) = slot.seat {
            let result = match self.phase {
                Phase::Waiting => self.vacate_seat(seat),
                Phase::Running => self.drop_player(seat),
                Phase::Over => self
                    .ctx
                    .set_seat_field(seat, "disconnected", Value::Bool(true)),
            };
            // Nobody is waiting on a reply; fatal errors still end the session.
            let _ = self.settle(result);
        }
        self.compact();
        Some(slot.name)
    }

    fn vacate_seat(&mut self, seat: usize) -> Result<(), HandlerError> {
        self.ctx.remove_seat(seat)?;
        for slot in self.clients.values_mut() {
            if let Some(s) = slot.seat.as_mut() {
                if *s > seat {
                    *s -= 1;
                }
            }
        }
        self.sync_ready_count()
    }

    fn drop_player(&mut self, seat: usize) -> Result<(), HandlerError> {
        self.mark_out(seat, "disconnected", "Disconnected")?;
        if self.settings().is_turn_based() && self.ctx.active_player() == Some(seat) {
            self.pass_turn()
        } else {
            self.commit();
            self.check_end();
            Ok(())
        }
    }

    /// Deltas committed since this client's last flush, in order.
    pub fn flush_deltas_for(&mut self, client: ClientId) -> Vec<Delta> {
        let head = self.log_head();
        let Some(slot) = self.clients.get_mut(&client) else {
            return Vec::new();
        };
        let start = usize::try_from(slot.cursor.saturating_sub(self.log_base)).unwrap_or(usize::MAX);
        let deltas = self.log.get(start..).map(<[Delta]>::to_vec).unwrap_or_default();
        slot.cursor = head;
        self.compact();
        deltas
    }

    fn log_head(&self) -> u64 {
        self.log_base + self.log.len() as u64
    }

    /// Move the graph's pending deltas into the shared log.
    fn commit(&mut self) {
        let deltas = self.ctx.flush();
        if !deltas.is_empty() {
            tracing::debug!("{}: committed {} deltas", self.game_name(), deltas.len());
            self.log.extend(deltas);
        }
        self.compact();
    }

    /// Drop the log prefix every client has already seen.
    fn compact(&mut self) {
        let head = self.log_head();
        let oldest = self
            .clients
            .values()
            .map(|slot| slot.cursor)
            .min()
            .unwrap_or(head);
        let drop = usize::try_from(oldest.saturating_sub(self.log_base))
            .unwrap_or(usize::MAX)
            .min(self.log.len());
        if drop > 0 {
            self.log.drain(..drop);
            self.log_base += drop as u64;
        }
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Validate and dispatch one remote call of `function` on `object_id`.
    pub fn register_order(
        &mut self,
        client: ClientId,
        object_id: &ObjectId,
        function: &str,
        args: &BTreeMap<String, WireValue>,
    ) -> Result<Returned, OrderError> {
        let seat = self.acting_seat(client)?;

        let object = self
            .ctx
            .object(object_id)
            .ok_or_else(|| OrderError::UnknownObject(object_id.clone()))?;
        let lineage = object.lineage().to_vec();
        let class = object.class().to_owned();
        let unknown = || OrderError::UnknownFunction {
            class: class.clone(),
            function: function.to_owned(),
        };
        let schema = self
            .ctx
            .schema()
            .function(&class, function)
            .cloned()
            .ok_or_else(unknown)?;

        if let Some(extra) = args
            .keys()
            .find(|name| !schema.arguments.iter().any(|arg| &arg.name == *name))
        {
            return Err(OrderError::UnexpectedArgument(extra.clone()));
        }
        let mut cast_args = BTreeMap::new();
        for field in &schema.arguments {
            let value = serializer::cast_field(field, args.get(&field.name), self.ctx.registry())
                .map_err(|source| OrderError::InvalidArgument {
                    argument: field.name.clone(),
                    source,
                })?;
            cast_args.insert(field.name.clone(), value);
        }

        let (_, binding) = self.dispatch.lookup(&lineage, function).ok_or_else(unknown)?;
        let call = Call {
            client,
            seat,
            this: object_id,
            args: &cast_args,
        };

        if let Some(validator) = &binding.validator {
            match context::inspect(&self.ctx, |ctx| validator(ctx, &call)) {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    tracing::debug!("{}: {client} {class}.{function} invalid: {reason}", self.game_name());
                    return Ok(Returned {
                        value: invalid_value(&schema.returns),
                        invalid: Some(reason),
                    });
                }
                Err(err) => return Err(self.fault(client, err)),
            }
        }

        let handler = &binding.handler;
        let result = context::guarded(&mut self.ctx, |ctx| handler(ctx, &call));
        let returned = match result {
            Ok(returned) => returned,
            Err(err) if err.is_fatal() => {
                self.fail(&err);
                return Err(OrderError::Fatal(err.to_string()));
            }
            Err(err) => return Err(self.fault(client, err)),
        };

        let reply = self.cast_return(&schema.returns, returned);
        self.commit();
        self.check_end();
        Ok(reply)
    }

    /// Seat of a client allowed to act right now.
    fn acting_seat(&self, client: ClientId) -> Result<usize, OrderError> {
        if self.phase != Phase::Running {
            return Err(OrderError::NotRunning);
        }
        let seat = self.client_seat(client).ok_or(OrderError::NotAPlayer)?;
        if self.ctx.seat_is_out(seat) {
            return Err(OrderError::ClientOut);
        }
        if self.settings().is_turn_based() && self.ctx.active_player() != Some(seat) {
            return Err(OrderError::NotYourTurn);
        }
        Ok(seat)
    }

    fn fault(&mut self, client: ClientId, err: HandlerError) -> OrderError {
        let reason = err.to_string();
        tracing::warn!("{}: {client} order faulted: {reason}", self.game_name());
        if let Some(slot) = self.clients.get_mut(&client) {
            slot.fault_reason = Some(reason.clone());
        }
        OrderError::HandlerFault(reason)
    }

    fn cast_return(&self, returns: &ReturnSchema, returned: Option<Value>) -> Returned {
        let Some(value) = returned else {
            let value = match &returns.default {
                Some(default) => default.clone(),
                None => serializer::flatten(&serializer::default_for(&returns.ty)),
            };
            return Returned {
                value,
                invalid: None,
            };
        };
        match serializer::cast(&returns.ty, &serializer::flatten(&value), self.ctx.registry()) {
            Ok(cast) => Returned {
                value: serializer::flatten(&cast),
                invalid: None,
            },
            Err(err) => Returned {
                value: invalid_value(returns),
                invalid: Some(format!("handler returned an invalid value: {err}")),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Turns and ticks
    // -----------------------------------------------------------------------

    /// End the caller's turn (turn-based mode).
    pub fn end_turn(&mut self, client: ClientId) -> Result<(), OrderError> {
        if !self.settings().is_turn_based() {
            return Err(OrderError::NotTurnBased);
        }
        self.acting_seat(client)?;
        self.advance_turn()
    }

    /// Pass the turn to the next seat still in the game.
    pub fn advance_turn(&mut self) -> Result<(), OrderError> {
        if self.phase != Phase::Running {
            return Err(OrderError::NotRunning);
        }
        if !self.settings().is_turn_based() {
            return Err(OrderError::NotTurnBased);
        }
        let result = self.pass_turn();
        self.settle(result)
    }

    fn pass_turn(&mut self) -> Result<(), HandlerError> {
        let Some(old) = self.ctx.active_player() else {
            return Ok(());
        };
        let remaining = self.time_remaining(old).unwrap_or_default();
        self.spent_ms = 0;
        self.ctx
            .set_seat_field(old, "timeRemaining", millis(remaining))?;
        if remaining.is_zero() && !self.ctx.seat_is_out(old) {
            self.time_out(old)?;
        }
        self.hook(|rules, ctx| rules.after_turn(ctx, old))?;

        let next = self.next_live_seat(old);
        let turn = self.ctx.current_turn() + 1;
        self.ctx.set_session("activePlayer", Value::from(next))?;
        self.ctx
            .set_session("currentTurn", Value::Int(i64::try_from(turn).unwrap_or(i64::MAX)))?;
        self.begin_turn(next)?;
        self.commit();
        tracing::debug!("{}: turn {turn}, seat {next} to act", self.game_name());

        if self.turn_limit_reached(turn) {
            self.finish_at_turn_limit();
        } else {
            self.check_end();
        }
        Ok(())
    }

    fn begin_turn(&mut self, seat: usize) -> Result<(), HandlerError> {
        let bonus = self.settings().time_added_per_turn_ms;
        if bonus > 0 {
            let bank = self.ctx.time_remaining_ms(seat).unwrap_or(0);
            self.ctx.set_seat_field(
                seat,
                "timeRemaining",
                millis(Duration::from_millis(bank.saturating_add(bonus))),
            )?;
        }
        self.hook(|rules, ctx| rules.before_turn(ctx, seat))
    }

    /// Seat after `from` that is still in the game. Falls back to the plain
    /// successor when nobody is.
    fn next_live_seat(&self, from: usize) -> usize {
        let seats = self.ctx.seat_count().max(1);
        (1..=seats)
            .map(|step| (from + step) % seats)
            .find(|&seat| !self.ctx.seat_is_out(seat))
            .unwrap_or((from + 1) % seats)
    }

    /// Charge `elapsed` to the active seat's time bank. Returns true if the
    /// bank is now empty; the seat is then marked timed out and the caller
    /// should `advance_turn`.
    pub fn elapse(&mut self, elapsed: Duration) -> bool {
        if self.phase != Phase::Running || !self.settings().is_turn_based() {
            return false;
        }
        let Some(seat) = self.ctx.active_player() else {
            return false;
        };
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.spent_ms = self.spent_ms.saturating_add(ms);
        let exhausted = self.time_remaining(seat).is_some_and(|left| left.is_zero());
        if exhausted && !self.ctx.seat_is_out(seat) {
            let result = self.time_out(seat);
            let _ = self.settle(result);
        }
        exhausted
    }

    fn time_out(&mut self, seat: usize) -> Result<(), HandlerError> {
        tracing::info!("{}: seat {seat} ran out of time", self.game_name());
        self.ctx
            .set_seat_field(seat, "timeRemaining", Value::Int(0))?;
        self.mark_out(seat, "timedOut", "Timed out")
    }

    /// Advance a real-time session by one tick.
    pub fn tick(&mut self) -> Result<(), OrderError> {
        if self.phase != Phase::Running {
            return Err(OrderError::NotRunning);
        }
        if self.settings().is_turn_based() {
            return Err(OrderError::NotTurnBased);
        }
        let result = self.run_tick();
        self.settle(result)
    }

    fn run_tick(&mut self) -> Result<(), HandlerError> {
        self.hook(|rules, ctx| rules.tick(ctx))?;
        let turn = self.ctx.current_turn() + 1;
        self.ctx
            .set_session("currentTurn", Value::Int(i64::try_from(turn).unwrap_or(i64::MAX)))?;
        self.commit();
        if self.turn_limit_reached(turn) {
            self.finish_at_turn_limit();
        } else {
            self.check_end();
        }
        Ok(())
    }

    fn turn_limit_reached(&self, turn: u64) -> bool {
        self.settings().max_turns.is_some_and(|max| turn >= max)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn start(&mut self) -> Result<(), HandlerError> {
        tracing::info!(
            "{}: all {} seats ready, starting",
            self.game_name(),
            self.ctx.seat_count()
        );
        self.phase = Phase::Running;
        self.ctx
            .set_session("phase", Value::from(Phase::Running.as_str()))?;

        let GameManager { rules, ctx, .. } = self;
        if let Err(err) = context::guarded(ctx, |ctx| rules.start(ctx)) {
            // A game that can't set itself up can't be played.
            return Err(match err {
                HandlerError::Fault(msg) => {
                    HandlerError::Fault(format!("game setup failed: {msg}"))
                }
                other => other,
            });
        }

        if self.settings().is_turn_based() {
            self.spent_ms = 0;
            self.ctx.set_session("activePlayer", Value::Int(0))?;
            self.begin_turn(0)?;
        }
        self.commit();
        self.check_end();
        Ok(())
    }

    /// Run a lifecycle hook under the rollback guard. Faults are logged and
    /// swallowed; structural errors propagate.
    fn hook(
        &mut self,
        f: impl FnOnce(&mut dyn GameRules, &mut GameContext) -> Result<(), HandlerError>,
    ) -> Result<(), HandlerError> {
        let GameManager { rules, ctx, .. } = self;
        match context::guarded(ctx, |ctx| f(&mut **rules, ctx)) {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                tracing::warn!("{}: game hook faulted: {err}", self.game_name());
                Ok(())
            }
        }
    }

    fn seat_flag(&self, seat: usize, field: &str) -> bool {
        self.ctx
            .seat_field(seat, field)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Set `flag` on a seat and, unless it already lost, mark it lost for
    /// `reason`.
    fn mark_out(&mut self, seat: usize, flag: &str, reason: &str) -> Result<(), HandlerError> {
        self.ctx.set_seat_field(seat, flag, Value::Bool(true))?;
        if !self.seat_flag(seat, "lost") {
            self.ctx.set_seat_field(seat, "lost", Value::Bool(true))?;
            self.ctx.set_seat_field(seat, "reason", Value::from(reason))?;
        }
        Ok(())
    }

    /// End the game if the rules say so, or if at most one seat is left in a
    /// multi-seat game.
    fn check_end(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let outcome = match context::inspect(&self.ctx, |ctx| self.rules.outcome(ctx)) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("{}: outcome check faulted: {err}", self.game_name());
                None
            }
        };
        if let Some(outcome) = outcome {
            self.finish(outcome);
            return;
        }

        let seats = self.ctx.seat_count();
        if seats < 2 {
            return;
        }
        let live: Vec<usize> = (0..seats).filter(|&s| !self.ctx.seat_is_out(s)).collect();
        match live.as_slice() {
            [] => self.finish(Outcome::draw("No players left")),
            [winner] => self.finish(Outcome::win(*winner, "Last player standing")),
            _ => {}
        }
    }

    fn finish_at_turn_limit(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let outcome = context::inspect(&self.ctx, |ctx| self.rules.max_turns_reached(ctx))
            .unwrap_or_else(|_| Outcome::draw("Turn limit reached"));
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Outcome) {
        let result = self.record_outcome(&outcome);
        self.phase = Phase::Over;
        self.over_reason = Some(outcome.reason.clone());
        match result {
            Ok(()) => tracing::info!(
                "{}: game over ({}), winners {:?}",
                self.game_name(),
                outcome.reason,
                outcome.winners
            ),
            Err(err) => self.fail(&err),
        }
        self.commit();
    }

    fn record_outcome(&mut self, outcome: &Outcome) -> Result<(), HandlerError> {
        for seat in 0..self.ctx.seat_count() {
            if outcome.winners.contains(&seat) {
                self.ctx.set_seat_field(seat, "won", Value::Bool(true))?;
                self.ctx.set_seat_field(seat, "lost", Value::Bool(false))?;
                self.ctx
                    .set_seat_field(seat, "reason", Value::from(outcome.reason.as_str()))?;
            } else if !outcome.is_draw() && !self.seat_flag(seat, "lost") {
                self.ctx.set_seat_field(seat, "lost", Value::Bool(true))?;
                self.ctx
                    .set_seat_field(seat, "reason", Value::from(outcome.reason.as_str()))?;
            }
        }
        self.ctx
            .set_session("phase", Value::from(Phase::Over.as_str()))?;
        self.ctx
            .set_session("overReason", Value::from(outcome.reason.as_str()))
    }

    /// End the session after an unrecoverable error.
    fn fail(&mut self, err: &HandlerError) {
        let reason = err.to_string();
        tracing::error!("{}: session failed: {reason}", self.game_name());
        self.phase = Phase::Over;
        self.failed = true;
        self.over_reason = Some(reason.clone());
        let marked = self
            .ctx
            .set_session("phase", Value::from(Phase::Over.as_str()))
            .and_then(|()| self.ctx.set_session("overReason", Value::from(reason)));
        if let Err(err) = marked {
            tracing::error!("{}: could not record failure: {err}", self.game_name());
        }
        self.commit();
    }

    /// Turn an internal result into the public one, ending the session on
    /// any error.
    fn settle(&mut self, result: Result<(), HandlerError>) -> Result<(), OrderError> {
        match result {
            Ok(()) => {
                self.commit();
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(OrderError::Fatal(err.to_string()))
            }
        }
    }
}

fn invalid_value(returns: &ReturnSchema) -> WireValue {
    returns
        .invalid_value
        .clone()
        .unwrap_or_else(|| serializer::flatten(&serializer::default_for(&returns.ty)))
}

fn millis(d: Duration) -> Value {
    Value::Int(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
