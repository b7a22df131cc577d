// Core ID and value types for the arena protocol.
//
// These are shared by `message.rs`, `delta.rs`, the core crate's serializer
// and the server's session loop. Client ids are server-assigned compact
// integers; object ids are the stable strings the core's registry hands out
// and that clients echo back in orders.
//
// Wire values are plain `serde_json::Value`s. The protocol deliberately knows
// nothing about game types: the core's serializer turns wire values into typed
// values (and back) according to the per-game schema.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport-neutral value exchanged with clients: scalars, ordered lists,
/// string-keyed maps, and game-object references (carried as id strings).
pub type WireValue = serde_json::Value;

/// Server-assigned client ID, unique within one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Stable, never-reused identifier of a game object within one session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a connecting client intends to do in a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientRole {
    /// Takes a seat, sends orders, counts toward the ready quorum.
    #[default]
    Player,
    /// Receives snapshots and deltas only.
    Spectator,
}
