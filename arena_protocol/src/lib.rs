// arena_protocol: wire protocol between the arena server and its clients.
//
// This crate defines the message types, delta shape and framing used by the
// game server (`arena_server`) and remote AI clients to talk over TCP. It is
// shared by both sides and has no dependency on the core engine.
//
// Module overview:
// - `types.rs`:    IDs (`ClientId`, `ObjectId`), `ClientRole`, and the
//                  `WireValue` alias.
// - `delta.rs`:    `PathKey`, `DeltaOp`, `WireDelta`, the replayable state
//                  change instructions clients apply to their mirrors.
// - `message.rs`:  Client-to-server and server-to-client message enums plus
//                  `OrderReply`.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// Design decisions:
// - **JSON serialization.** AI clients are written in many languages; JSON is
//   the lowest common denominator and `serde_json::Value` doubles as the
//   transport-neutral wire value.
// - **No async runtime.** Framing uses `std::io::Read`/`Write`, compatible
//   with blocking TCP streams and buffered wrappers.

pub mod delta;
pub mod framing;
pub mod message;
pub mod types;

pub use delta::{DeltaOp, PathKey, WireDelta};
pub use framing::{FrameError, MAX_MESSAGE_SIZE, read_frame, recv, send, write_frame};
pub use message::{ClientMessage, OrderReply, ServerMessage};
pub use types::{ClientId, ClientRole, ObjectId, WireValue};

/// Protocol version sent in `Hello`. Bumped on incompatible message changes.
pub const PROTOCOL_VERSION: u32 = 1;
