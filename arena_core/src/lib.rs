// arena_core: the game-agnostic engine behind the arena server.
//
// This crate holds everything a session needs that isn't transport or game
// rules: the typed value model, per-game schemas, the object registry, the
// change-tracking property graph, the wire serializer, handler dispatch and
// the session state machine. It has no networking code and no game logic;
// `arena_server` drives it over TCP and `arena_games` plugs rules into it.
//
// Module overview:
// - `value.rs`:      `Value` (typed in-memory values, object references by id)
//                    and `Kind` (scalar / list / map).
// - `schema.rs`:     `GameSchema`, `ClassSchema`, `TypeSpec` and friends,
//                    loaded from JSON or built in code.
// - `registry.rs`:   Per-session object arena: id allocation and lookup.
// - `serializer.rs`: Type-directed casting of wire values (`cast`,
//                    `cast_field`) and flattening back to wire form.
// - `delta.rs`:      `DeltaGraph`, the state tree that records every mutation
//                    as a replayable `Delta`, with an undo journal.
// - `dispatch.rs`:   Binding handlers and validators to schema functions.
// - `context.rs`:    `GameContext`, the handle game code mutates state
//                    through, and the `guarded` rollback primitive.
// - `rules.rs`:      `GameRules` / `GameFactory`, what a game provides.
// - `settings.rs`:   `GameSettings` and `SessionMode`.
// - `manager.rs`:    `GameManager`, the per-session state machine.
// - `error.rs`:      Error enums for every concern, with wire codes.
//
// Everything here is single-threaded and deterministic given the same
// sequence of calls: ordered maps throughout, no clocks (elapsed time is
// passed in by the caller).

pub mod context;
pub mod delta;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod registry;
pub mod rules;
pub mod schema;
pub mod serializer;
pub mod settings;
pub mod value;

pub use arena_protocol::delta::{DeltaOp, PathKey};
pub use arena_protocol::types::{ClientId, ClientRole, ObjectId, WireValue};
pub use context::{GameContext, Phase};
pub use delta::{Checkpoint, Delta, DeltaGraph};
pub use dispatch::{Call, DispatchTable, DispatchTableBuilder};
pub use error::{
    CastError, HandlerError, JoinError, OrderError, SchemaError, StructuralInvariantError,
};
pub use manager::{GameManager, Joined, Returned};
pub use registry::{GameObject, Registry};
pub use rules::{GameFactory, GameRules, Outcome};
pub use schema::{
    AttributeSchema, ClassSchema, FieldSchema, FunctionSchema, GameSchema, ReturnSchema, TypeSpec,
};
pub use settings::{GameSettings, SessionMode};
pub use value::{Kind, Value};
