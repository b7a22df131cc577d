// arena_server: TCP game server for remote AI clients.
//
// Hosts any number of named sessions of one game. Clients connect over TCP,
// name a session in their `Hello`, and from then on exchange framed JSON
// messages (`arena_protocol`) with that session's `GameManager`
// (`arena_core`). Game rules come from `arena_games`.
//
// Module overview:
// - `session.rs`:  `Session`, one `GameManager` plus its clients' write
//                  halves. Turns client messages into manager calls and
//                  publishes replies, deltas and end-of-game notices.
// - `server.rs`:   TCP listener, router, per-session event loop threads and
//                  per-client reader threads, all plain `std::net` +
//                  `mpsc`. `ServerConfig` and `start_server`.
// - `client.rs`:   `NetClient`, a blocking client with a background reader
//                  thread and a local state mirror. Used by tests and by
//                  anyone writing a Rust bot.
//
// The server can run as a standalone binary (`main.rs`, the `arena` binary)
// or be embedded via `start_server`.

pub mod client;
pub mod server;
pub mod session;

pub use client::{ClientError, NetClient, WelcomeInfo};
pub use server::{ServerConfig, ServerHandle, start_server};
