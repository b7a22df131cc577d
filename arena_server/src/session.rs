// Per-session state for the arena server.
//
// `Session` wraps one `GameManager` together with the write halves of its
// clients' TCP streams. `server.rs` runs each session on its own thread and
// feeds it events one at a time; nothing here locks.
//
// Key responsibilities:
// - Admission: run `GameManager::connect`, answer with `Welcome` (carrying
//   the join snapshot) or `Rejected`.
// - Orders: translate `ClientMessage`s into manager calls and send the
//   `Reply` to the ordering client only.
// - Publishing: after every event, hand each client the deltas it hasn't
//   seen, then announce `Over` (or `Fatal`) once when the game ends.
// - Timers: charge wall time to the active seat's bank (turn-based) or run
//   ticks at the configured interval (real-time).
//
// Writing to client streams: `send_to` / `broadcast` frame a `ServerMessage`
// as JSON. Write errors on one client are logged but don't stop the session;
// that client's reader thread sees the broken pipe and reports it as a
// disconnect.

use std::collections::BTreeMap;
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use arena_core::{GameManager, OrderError, Phase, SessionMode};
use arena_protocol::framing;
use arena_protocol::message::{ClientMessage, OrderReply, ServerMessage};
use arena_protocol::types::{ClientId, ClientRole};

/// One hosted game.
pub struct Session {
    pub name: String,
    manager: GameManager,
    clients: BTreeMap<ClientId, ClientConn>,
    /// Whether the end of the game has been announced.
    announced: bool,
    /// Whether anyone ever joined.
    had_clients: bool,
    /// Real-time sessions: when the next tick is due.
    next_tick: Option<Instant>,
    /// Turn-based sessions: when wall time was last charged.
    last_charge: Instant,
}

struct ClientConn {
    name: String,
    writer: BufWriter<TcpStream>,
}

impl Session {
    pub fn new(name: String, manager: GameManager) -> Self {
        Self {
            name,
            manager,
            clients: BTreeMap::new(),
            announced: false,
            had_clients: false,
            next_tick: None,
            last_charge: Instant::now(),
        }
    }

    pub fn manager(&self) -> &GameManager {
        &self.manager
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// The session has nothing left to do: it crashed, or everyone who
    /// joined has left.
    pub fn is_finished(&self) -> bool {
        self.manager.failed() || (self.had_clients && self.clients.is_empty())
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    /// Admit a client and send it `Welcome`. On refusal the reason is
    /// returned and nothing is written; the caller sends `Rejected`.
    pub fn add_client(
        &mut self,
        client_name: &str,
        role: ClientRole,
        stream: TcpStream,
    ) -> Result<ClientId, String> {
        let joined = self
            .manager
            .connect(client_name, role)
            .map_err(|e| e.to_string())?;
        tracing::info!(
            "[{}] {} connected as {client_name} ({role:?})",
            self.name,
            joined.client
        );
        self.had_clients = true;
        self.clients.insert(
            joined.client,
            ClientConn {
                name: client_name.to_owned(),
                writer: BufWriter::new(stream),
            },
        );
        let welcome = ServerMessage::Welcome {
            client_id: joined.client,
            session_name: self.name.clone(),
            game_name: self.manager.game_name().to_owned(),
            seat: joined.seat,
            snapshot: joined.snapshot,
        };
        self.send_to(joined.client, &welcome);
        self.publish();
        Ok(joined.client)
    }

    /// Drop a client, tell the others, and publish whatever its departure
    /// changed (a forfeited seat, a passed turn).
    pub fn remove_client(&mut self, client: ClientId) {
        let Some(conn) = self.clients.remove(&client) else {
            return;
        };
        let _ = conn.writer.get_ref().shutdown(Shutdown::Both);
        self.manager.disconnect(client);
        tracing::info!("[{}] {client} ({}) disconnected", self.name, conn.name);
        self.broadcast(&ServerMessage::ClientLeft {
            client_id: client,
            name: conn.name,
        });
        self.publish();
    }

    /// Handle one message from a connected client.
    pub fn handle_message(&mut self, client: ClientId, message: ClientMessage) {
        match message {
            ClientMessage::Ready => {
                if let Err(err) = self.manager.ready(client) {
                    self.reply_error(client, &err);
                }
            }
            ClientMessage::Order {
                object_id,
                function,
                args,
            } => {
                let reply = match self.manager.register_order(client, &object_id, &function, &args) {
                    Ok(returned) => OrderReply::Returned {
                        returned: returned.value,
                        invalid: returned.invalid,
                    },
                    Err(err) => error_reply(&err),
                };
                self.send_to(client, &ServerMessage::Reply(reply));
            }
            ClientMessage::EndTurn => {
                if let Err(err) = self.manager.end_turn(client) {
                    self.reply_error(client, &err);
                }
            }
            ClientMessage::Hello { .. } => {
                tracing::warn!("[{}] {client} sent a second Hello, ignoring", self.name);
            }
            ClientMessage::Goodbye => {
                self.remove_client(client);
                return;
            }
        }
        self.publish();
    }

    fn reply_error(&mut self, client: ClientId, err: &OrderError) {
        tracing::debug!("[{}] {client} rejected: {err}", self.name);
        self.send_to(client, &ServerMessage::Reply(error_reply(err)));
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// How long the event loop may sleep before `on_timer` has work to do.
    /// `None` when no clock is running.
    pub fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        if self.manager.phase() != Phase::Running {
            return None;
        }
        match self.manager.settings().mode {
            SessionMode::TurnBased => self.manager.turn_deadline(),
            SessionMode::RealTime { tick_ms } => Some(
                self.next_tick
                    .map_or(Duration::from_millis(tick_ms), |due| due.saturating_duration_since(now)),
            ),
        }
    }

    /// Bring the clocks up to `now`: charge the active seat's bank and pass
    /// the turn on timeout, or run the tick if it is due.
    pub fn on_timer(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_charge);
        self.last_charge = now;
        if self.manager.phase() != Phase::Running {
            self.next_tick = None;
            return;
        }
        match self.manager.settings().mode {
            SessionMode::TurnBased => {
                if self.manager.elapse(elapsed) {
                    tracing::info!("[{}] turn timed out", self.name);
                    if let Err(err) = self.manager.advance_turn() {
                        tracing::warn!("[{}] could not pass the turn: {err}", self.name);
                    }
                }
            }
            SessionMode::RealTime { tick_ms } => {
                let interval = Duration::from_millis(tick_ms.max(1));
                let due = *self.next_tick.get_or_insert(now + interval);
                if now >= due {
                    if let Err(err) = self.manager.tick() {
                        tracing::warn!("[{}] tick failed: {err}", self.name);
                    }
                    self.next_tick = Some(now + interval);
                }
            }
        }
        self.publish();
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Send every client its unseen deltas, then announce the end of the
    /// game if it just happened.
    fn publish(&mut self) {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for client in ids {
            let deltas = self.manager.flush_deltas_for(client);
            if !deltas.is_empty() {
                let deltas = deltas.iter().map(|d| d.to_wire()).collect();
                self.send_to(client, &ServerMessage::Deltas { deltas });
            }
        }

        if self.manager.phase() == Phase::Over && !self.announced {
            self.announced = true;
            let reason = self.manager.over_reason().unwrap_or_default().to_owned();
            if self.manager.failed() {
                tracing::error!("[{}] session failed: {reason}", self.name);
                self.broadcast(&ServerMessage::Fatal { reason });
            } else {
                tracing::info!("[{}] game over: {reason}", self.name);
                self.broadcast(&ServerMessage::Over { reason });
            }
        }
    }

    /// Close every client stream. Reader threads see EOF and exit.
    pub fn close(&mut self) {
        for conn in self.clients.values() {
            let _ = conn.writer.get_ref().shutdown(Shutdown::Both);
        }
        self.clients.clear();
    }

    fn send_to(&mut self, client: ClientId, msg: &ServerMessage) {
        if let Some(conn) = self.clients.get_mut(&client) {
            if let Err(e) = framing::send(&mut conn.writer, msg) {
                tracing::warn!("[{}] write to {client} failed: {e}", self.name);
            }
        }
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        for (client, conn) in &mut self.clients {
            if let Err(e) = framing::send(&mut conn.writer, msg) {
                tracing::warn!("[{}] write to {client} failed: {e}", self.name);
            }
        }
    }
}

fn error_reply(err: &OrderError) -> OrderReply {
    OrderReply::Error {
        code: err.code().to_owned(),
        message: err.to_string(),
    }
}
