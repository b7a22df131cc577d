// Error taxonomy of the core.
//
// Each concern gets its own `thiserror` enum:
// - `CastError`: a wire value does not fit its declared type, or names an
//   object the registry does not know. Raised by the serializer.
// - `StructuralInvariantError`: a tracked path would change kind, or a
//   mutation targets a container that isn't there. Always a defect in game
//   code; fatal to the owning session.
// - `SchemaError`: the per-game schema or dispatch bindings are inconsistent.
// - `HandlerError`: what game logic (handlers and hooks) may return.
// - `OrderError`: why a client's order was rejected, with a stable wire code.
// - `JoinError`: why a client could not join a session.
//
// Client-triggerable errors (`OrderError` other than `Fatal`) are reported to
// the offending client only. See `manager.rs` for where each one is raised.

use arena_protocol::types::ObjectId;
use thiserror::Error;

use crate::value::Kind;

/// A wire value could not be cast to its declared type.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CastError {
    #[error("expected {expected}, got {found}")]
    Validation { expected: String, found: String },
    #[error("required value is missing")]
    Missing,
    #[error("no game object with id `{0}`")]
    UnresolvedReference(ObjectId),
}

impl CastError {
    pub(crate) fn validation(expected: impl Into<String>, found: impl Into<String>) -> Self {
        CastError::Validation {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Wire code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            CastError::Validation { .. } | CastError::Missing => "validation",
            CastError::UnresolvedReference(_) => "unresolved-reference",
        }
    }
}

/// A mutation would break the shape of the property graph.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StructuralInvariantError {
    #[error("{path}: kind changed from {from} to {to}")]
    KindChanged { path: String, from: Kind, to: Kind },
    #[error("{path}: no container at this path")]
    MissingContainer { path: String },
    #[error("{path}: index {index} out of range for length {len}")]
    IndexOutOfRange { path: String, index: usize, len: usize },
}

/// The schema or its handler bindings are inconsistent.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SchemaError {
    #[error("unknown class `{0}`")]
    UnknownClass(String),
    #[error("class `{0}` inherits from itself")]
    InheritanceCycle(String),
    #[error("`{owner}.{name}`: default value does not fit its type: {source}")]
    BadDefault {
        owner: String,
        name: String,
        source: CastError,
    },
    #[error("`{class}.{name}` is reserved")]
    ReservedAttribute { class: String, name: String },
    #[error("`{class}` has no attribute `{name}`")]
    UnknownAttribute { class: String, name: String },
    #[error("`{class}.{function}` is declared but has no handler")]
    MissingHandler { class: String, function: String },
    #[error("handler bound for undeclared function `{class}.{function}`")]
    UndeclaredHandler { class: String, function: String },
    #[error("game object id `{0}` is already taken")]
    DuplicateObjectId(ObjectId),
}

/// Failure raised by game logic during dispatch or a lifecycle hook.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum HandlerError {
    /// The handler gave up; its action counts as a no-op.
    #[error("{0}")]
    Fault(String),
    /// Game logic tried to store a value that doesn't fit the schema.
    #[error("game logic wrote an invalid value: {0}")]
    Validation(#[from] CastError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Fatal to the session.
    #[error(transparent)]
    Structural(#[from] StructuralInvariantError),
}

impl HandlerError {
    pub fn fault(msg: impl Into<String>) -> Self {
        HandlerError::Fault(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Structural(_))
    }
}

/// Why an order (or ready / end-turn request) was refused.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum OrderError {
    #[error("argument `{argument}`: {source}")]
    InvalidArgument { argument: String, source: CastError },
    #[error("unexpected argument `{0}`")]
    UnexpectedArgument(String),
    #[error("no game object with id `{0}`")]
    UnknownObject(ObjectId),
    #[error("`{class}` has no function `{function}`")]
    UnknownFunction { class: String, function: String },
    #[error("the game is not running")]
    NotRunning,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("only seated players can do that")]
    NotAPlayer,
    #[error("you are out of the game")]
    ClientOut,
    #[error("real-time sessions have no turns")]
    NotTurnBased,
    #[error("handler fault: {0}")]
    HandlerFault(String),
    #[error("session failed: {0}")]
    Fatal(String),
}

impl OrderError {
    /// Stable wire code sent in `OrderReply::Error`.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidArgument { source, .. } => source.code(),
            OrderError::UnexpectedArgument(_) => "validation",
            OrderError::UnknownObject(_) => "unresolved-reference",
            OrderError::UnknownFunction { .. } => "unknown-function",
            OrderError::NotRunning => "not-running",
            OrderError::NotYourTurn => "not-your-turn",
            OrderError::NotAPlayer => "not-a-player",
            OrderError::ClientOut => "client-out",
            OrderError::NotTurnBased => "not-turn-based",
            OrderError::HandlerFault(_) => "handler-fault",
            OrderError::Fatal(_) => "fatal",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OrderError::Fatal(_))
    }
}

/// Why a client could not join a session.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("session is full")]
    Full,
    #[error("game already started")]
    AlreadyStarted,
    #[error("game is over")]
    Over,
}
