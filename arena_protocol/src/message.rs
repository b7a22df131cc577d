// Protocol messages for client-server communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by AI clients (and spectators) to the server.
// - `ServerMessage`: sent by the server to clients.
//
// Orders carry their arguments as untyped wire values keyed by argument name.
// The server never trusts their shape: the core's serializer casts each one
// against the function schema before anything runs. Replies to an order go
// to the ordering client only; deltas go to every client of the session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delta::WireDelta;
use crate::types::{ClientId, ClientRole, ObjectId, WireValue};

/// Messages sent by a client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Join (or create) a named session. Must be the first message.
    Hello {
        protocol_version: u32,
        client_name: String,
        session: String,
        role: ClientRole,
    },
    /// The client is ready for the game to start.
    Ready,
    /// Invoke a function on a game object.
    Order {
        object_id: ObjectId,
        function: String,
        args: BTreeMap<String, WireValue>,
    },
    /// Turn-based sessions: the active player is done with this turn.
    EndTurn,
    /// Client is leaving gracefully.
    Goodbye,
}

/// Messages sent by the server to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted. `snapshot` is the full state all later deltas
    /// apply to.
    Welcome {
        client_id: ClientId,
        session_name: String,
        game_name: String,
        seat: Option<usize>,
        snapshot: WireValue,
    },
    /// Handshake rejected.
    Rejected { reason: String },
    /// Answer to this client's last order.
    Reply(OrderReply),
    /// State changes since this client's previous delta message, in order.
    Deltas { deltas: Vec<WireDelta> },
    /// Another client disconnected.
    ClientLeft { client_id: ClientId, name: String },
    /// The game is over.
    Over { reason: String },
    /// The session hit an unrecoverable error and is shutting down.
    Fatal { reason: String },
}

/// Result of one order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderReply {
    /// The order ran (or was judged invalid by the game's rules, in which case
    /// `invalid` holds the reason and `returned` the declared invalid value).
    Returned {
        returned: WireValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invalid: Option<String>,
    },
    /// The order was rejected before or during dispatch.
    Error { code: String, message: String },
}
