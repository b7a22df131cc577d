// Test-only AI client for end-to-end tests.
//
// Wraps the real `NetClient` (from `arena_server::client`) and provides a
// synchronous, test-friendly API over it: send an order and block for its
// reply, wait until the mirrored state satisfies a predicate, and so on.
//
// The only test-specific code here is the blocking wait loops. Networking,
// framing and delta application use the same code paths as a real bot.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use arena_core::{DeltaGraph, PathKey, Value, path};
use arena_protocol::message::{OrderReply, ServerMessage};
use arena_protocol::types::{ClientId, ClientRole, ObjectId, WireValue};
use arena_server::client::NetClient;
use serde_json::json;

/// Default timeout for blocking waits.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Slice of the timeout spent in each blocking receive.
const RECV_SLICE: Duration = Duration::from_millis(20);

/// A blocking game client for tests.
pub struct TestGameClient {
    client: NetClient,
    /// Everything received that a wait loop didn't consume, oldest first.
    pub backlog: Vec<ServerMessage>,
}

impl TestGameClient {
    /// Connect and perform the `Hello` handshake.
    pub fn connect(addr: SocketAddr, name: &str, session: &str, role: ClientRole) -> Self {
        let client =
            NetClient::connect(addr, name, session, role).expect("TestGameClient::connect failed");
        Self {
            client,
            backlog: Vec::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client.client_id()
    }

    pub fn seat(&self) -> Option<usize> {
        self.client.seat()
    }

    pub fn mirror(&self) -> &DeltaGraph {
        self.client.mirror()
    }

    /// Read one value from the mirror.
    pub fn get(&self, at: &[PathKey]) -> Option<Value> {
        self.client.mirror().get(at)
    }

    pub fn phase(&self) -> Option<String> {
        self.get(&path!["session", "phase"])
            .and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn active_player(&self) -> Option<usize> {
        self.get(&path!["session", "activePlayer"])
            .and_then(|v| v.as_int())
            .and_then(|i| usize::try_from(i).ok())
    }

    /// This client's game object, once the game has assigned one.
    pub fn my_object(&self) -> Option<ObjectId> {
        let seat = self.seat()?;
        self.get(&path!["session", "players", seat, "gameObject"])?
            .as_object()
            .cloned()
    }

    pub fn ready(&mut self) {
        self.client.send_ready().expect("send_ready failed");
    }

    pub fn end_turn(&mut self) {
        self.client.send_end_turn().expect("send_end_turn failed");
    }

    /// Send an order and block until its reply arrives.
    pub fn order(&mut self, object: &ObjectId, function: &str, args: BTreeMap<String, WireValue>) -> OrderReply {
        self.client
            .send_order(object, function, args)
            .expect("send_order failed");
        match self.wait_for(|m| matches!(m, ServerMessage::Reply(_))) {
            ServerMessage::Reply(reply) => reply,
            _ => unreachable!(),
        }
    }

    /// Nim: take `count` stones through this client's player object.
    pub fn take(&mut self, count: i64) -> OrderReply {
        let me = self.my_object().expect("no player object yet");
        self.order(&me, "take", BTreeMap::from([("count".to_owned(), json!(count))]))
    }

    /// Block until a message matching `pred` arrives. Earlier messages go to
    /// the backlog.
    pub fn wait_for(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        if let Some(pos) = self.backlog.iter().position(&pred) {
            return self.backlog.remove(pos);
        }
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < WAIT_TIMEOUT, "timed out waiting for a message");
            let received = self.client.recv_timeout(RECV_SLICE).expect("receive failed");
            if let Some(msg) = received {
                if pred(&msg) {
                    return msg;
                }
                self.backlog.push(msg);
            }
        }
    }

    /// Block until the mirrored state satisfies `pred`.
    pub fn wait_until(&mut self, pred: impl Fn(&Self) -> bool) {
        let start = Instant::now();
        while !pred(self) {
            assert!(start.elapsed() < WAIT_TIMEOUT, "timed out waiting for state");
            if let Some(msg) = self.client.recv_timeout(RECV_SLICE).expect("receive failed") {
                self.backlog.push(msg);
            }
        }
    }

    /// Send Goodbye and close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }
}
