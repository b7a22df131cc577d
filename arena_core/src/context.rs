// Per-session game context.
//
// `GameContext` is the explicit handle threaded into every handler, validator
// and lifecycle hook. It owns the session's property graph, its object
// registry, the game schema and the settings; there is no global state.
//
// Graph layout (every key below is a tracked path clients mirror):
//
//   session/        turn state, owned by the manager, read-only to game code
//     phase, activePlayer, currentTurn, playersReady, requiredPlayers,
//     overReason, players: [{name, ready, timeRemaining, timedOut,
//                            disconnected, won, lost, reason, gameObject}]
//   game/<attr>     game-level attributes declared in the schema
//   gameObjects/<id>/<attr>
//                   one map per registered object, including the built-in
//                   `id` and `gameObjectName`
//
// All attribute writes go through the schema: the value is flattened to wire
// form and cast against the attribute's declared type before it touches the
// graph, so game code can't store a value clients couldn't have sent.
//
// `guarded` is the single rollback primitive: it runs game code against a
// graph checkpoint and registry mark, and undoes both on error or panic.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arena_protocol::types::{ObjectId, WireValue};

use crate::delta::{Delta, DeltaGraph};
use crate::error::{HandlerError, SchemaError};
use crate::path;
use crate::registry::{GameObject, Registry};
use crate::schema::{AttributeSchema, CLASS_ATTRIBUTE, GameSchema, ID_ATTRIBUTE, TypeSpec};
use crate::serializer;
use crate::settings::GameSettings;
use crate::value::Value;

pub const SESSION: &str = "session";
pub const GAME: &str = "game";
pub const OBJECTS: &str = "gameObjects";

/// Owner label for game-level attributes in error messages.
const GAME_OWNER: &str = "game";

/// Session lifecycle. `Over` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Running,
    Over,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Running => "running",
            Phase::Over => "over",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Phase::Waiting),
            "running" => Some(Phase::Running),
            "over" => Some(Phase::Over),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct GameContext {
    schema: Arc<GameSchema>,
    settings: GameSettings,
    graph: DeltaGraph,
    registry: Registry,
}

impl fmt::Debug for GameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameContext")
            .field("game", &self.schema.name)
            .field("objects", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl GameContext {
    /// A context with the three top-level maps created and every game
    /// attribute at its default.
    pub fn new(schema: Arc<GameSchema>, settings: GameSettings) -> Result<Self, HandlerError> {
        let mut ctx = Self {
            schema,
            settings,
            graph: DeltaGraph::new(),
            registry: Registry::new(),
        };
        let required = ctx.settings.required_players;
        ctx.graph.set(
            &path![SESSION],
            Value::map([
                ("phase", Value::from(Phase::Waiting.as_str())),
                ("activePlayer", Value::Null),
                ("currentTurn", Value::Int(0)),
                ("playersReady", Value::Int(0)),
                ("requiredPlayers", Value::from(required)),
                ("overReason", Value::Null),
                ("players", Value::List(Vec::new())),
            ]),
        )?;

        let mut game = BTreeMap::new();
        for (name, attr) in &ctx.schema.game_attributes {
            game.insert(name.clone(), ctx.initial(attr)?);
        }
        ctx.graph.set(&path![GAME], Value::Map(game))?;
        ctx.graph.set(&path![OBJECTS], Value::Map(BTreeMap::new()))?;
        Ok(ctx)
    }

    pub fn schema(&self) -> &GameSchema {
        &self.schema
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn graph(&self) -> &DeltaGraph {
        &self.graph
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn initial(&self, attr: &AttributeSchema) -> Result<Value, HandlerError> {
        Ok(serializer::cast_or_default(
            &attr.ty,
            None,
            attr.default.as_ref(),
            &self.registry,
        )?)
    }

    // -----------------------------------------------------------------------
    // Game objects
    // -----------------------------------------------------------------------

    /// Register a new object of `class` and give it its default attributes.
    pub fn create_object(&mut self, class: &str) -> Result<ObjectId, HandlerError> {
        let id = self.registry.create(&self.schema, class)?;
        self.materialize(&id, class)?;
        Ok(id)
    }

    /// Like `create_object`, with a caller-chosen id.
    pub fn create_object_with_id(
        &mut self,
        id: impl Into<ObjectId>,
        class: &str,
    ) -> Result<ObjectId, HandlerError> {
        let id = self.registry.create_with_id(&self.schema, id.into(), class)?;
        self.materialize(&id, class)?;
        Ok(id)
    }

    fn materialize(&mut self, id: &ObjectId, class: &str) -> Result<(), HandlerError> {
        let mut entries = BTreeMap::new();
        entries.insert(ID_ATTRIBUTE.to_owned(), Value::from(id.as_str()));
        entries.insert(CLASS_ATTRIBUTE.to_owned(), Value::from(class));
        for (name, attr) in self.schema.attributes_of(class) {
            entries.insert(name.to_owned(), self.initial(attr)?);
        }
        self.graph
            .put_key(&path![OBJECTS], id.as_str(), Value::Map(entries))?;
        Ok(())
    }

    pub fn object(&self, id: &ObjectId) -> Option<&GameObject> {
        self.registry.get(id)
    }

    /// Ids of every object that is a `class` (or a subclass), in id order.
    pub fn objects_of(&self, class: &str) -> Vec<ObjectId> {
        self.registry
            .iter()
            .filter(|obj| obj.is_a(class))
            .map(|obj| obj.id().clone())
            .collect()
    }

    pub fn attr(&self, id: &ObjectId, name: &str) -> Option<Value> {
        self.graph.get(&path![OBJECTS, id.as_str(), name])
    }

    pub fn set_attr(
        &mut self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), HandlerError> {
        let ty = self.object_attr_type(id, name)?;
        let value = self.conform(&ty, &value.into())?;
        self.graph.set(&path![OBJECTS, id.as_str(), name], value)?;
        Ok(())
    }

    /// Append to a list-typed attribute.
    pub fn push_attr(
        &mut self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), HandlerError> {
        let ty = self.object_attr_type(id, name)?;
        let element = self.element_of(&ty, id.as_str(), name)?;
        let value = self.conform(&element, &value.into())?;
        self.graph.push(&path![OBJECTS, id.as_str(), name], value)?;
        Ok(())
    }

    /// Insert or replace one entry of a map-typed attribute.
    pub fn put_attr_key(
        &mut self,
        id: &ObjectId,
        name: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), HandlerError> {
        let ty = self.object_attr_type(id, name)?;
        let element = self.element_of(&ty, id.as_str(), name)?;
        let value = self.conform(&element, &value.into())?;
        self.graph
            .put_key(&path![OBJECTS, id.as_str(), name], key, value)?;
        Ok(())
    }

    pub fn remove_attr_key(&mut self, id: &ObjectId, name: &str, key: &str) -> Result<(), HandlerError> {
        self.object_attr_type(id, name)?;
        self.graph
            .remove_key(&path![OBJECTS, id.as_str(), name], key)?;
        Ok(())
    }

    fn object_attr_type(&self, id: &ObjectId, name: &str) -> Result<TypeSpec, HandlerError> {
        let object = self
            .registry
            .get(id)
            .ok_or_else(|| HandlerError::fault(format!("no game object with id `{id}`")))?;
        if name == ID_ATTRIBUTE || name == CLASS_ATTRIBUTE {
            return Err(SchemaError::ReservedAttribute {
                class: object.class().to_owned(),
                name: name.to_owned(),
            }
            .into());
        }
        self.schema
            .attribute(object.class(), name)
            .map(|attr| attr.ty.clone())
            .ok_or_else(|| {
                SchemaError::UnknownAttribute {
                    class: object.class().to_owned(),
                    name: name.to_owned(),
                }
                .into()
            })
    }

    // -----------------------------------------------------------------------
    // Game-level attributes
    // -----------------------------------------------------------------------

    pub fn game_attr(&self, name: &str) -> Option<Value> {
        self.graph.get(&path![GAME, name])
    }

    pub fn set_game_attr(&mut self, name: &str, value: impl Into<Value>) -> Result<(), HandlerError> {
        let ty = self.game_attr_type(name)?;
        let value = self.conform(&ty, &value.into())?;
        self.graph.set(&path![GAME, name], value)?;
        Ok(())
    }

    pub fn push_game_attr(&mut self, name: &str, value: impl Into<Value>) -> Result<(), HandlerError> {
        let ty = self.game_attr_type(name)?;
        let element = self.element_of(&ty, GAME_OWNER, name)?;
        let value = self.conform(&element, &value.into())?;
        self.graph.push(&path![GAME, name], value)?;
        Ok(())
    }

    fn game_attr_type(&self, name: &str) -> Result<TypeSpec, HandlerError> {
        self.schema
            .game_attributes
            .get(name)
            .map(|attr| attr.ty.clone())
            .ok_or_else(|| {
                SchemaError::UnknownAttribute {
                    class: GAME_OWNER.to_owned(),
                    name: name.to_owned(),
                }
                .into()
            })
    }

    /// Element type of a list- or map-typed attribute.
    fn element_of(&self, ty: &TypeSpec, owner: &str, name: &str) -> Result<TypeSpec, HandlerError> {
        match ty {
            TypeSpec::List { element } => Ok((**element).clone()),
            TypeSpec::Map { value } => Ok((**value).clone()),
            other => Err(HandlerError::fault(format!(
                "`{owner}.{name}` is not a collection ({other:?})"
            ))),
        }
    }

    /// Round-trip a value through its wire form so it obeys `ty`.
    fn conform(&self, ty: &TypeSpec, value: &Value) -> Result<Value, HandlerError> {
        let wire: WireValue = serializer::flatten(value);
        Ok(serializer::cast(ty, &wire, &self.registry)?)
    }

    // -----------------------------------------------------------------------
    // Turn state (read-only to game code)
    // -----------------------------------------------------------------------

    fn session(&self, key: &str) -> Option<Value> {
        self.graph.get(&path![SESSION, key])
    }

    pub fn phase(&self) -> Phase {
        self.session("phase")
            .and_then(|v| v.as_str().and_then(Phase::parse))
            .unwrap_or(Phase::Waiting)
    }

    /// Active seat, if the game is running.
    pub fn active_player(&self) -> Option<usize> {
        self.session("activePlayer")
            .and_then(|v| v.as_int())
            .and_then(|i| usize::try_from(i).ok())
    }

    pub fn current_turn(&self) -> u64 {
        self.session("currentTurn")
            .and_then(|v| v.as_int())
            .and_then(|i| u64::try_from(i).ok())
            .unwrap_or(0)
    }

    pub fn seat_count(&self) -> usize {
        self.graph
            .list_len(&path![SESSION, "players"])
            .unwrap_or(0)
    }

    pub(crate) fn seat_field(&self, seat: usize, field: &str) -> Option<Value> {
        self.graph.get(&path![SESSION, "players", seat, field])
    }

    pub fn seat_name(&self, seat: usize) -> Option<String> {
        self.seat_field(seat, "name")
            .and_then(|v| v.as_str().map(str::to_owned))
    }

    /// Out of the game: lost, timed out or disconnected.
    pub fn seat_is_out(&self, seat: usize) -> bool {
        self.seat_field(seat, "lost")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    pub fn time_remaining_ms(&self, seat: usize) -> Option<u64> {
        self.seat_field(seat, "timeRemaining")
            .and_then(|v| v.as_int())
            .and_then(|i| u64::try_from(i).ok())
    }

    /// The game object standing for `seat`, if the game assigned one.
    pub fn seat_object(&self, seat: usize) -> Option<ObjectId> {
        self.seat_field(seat, "gameObject")
            .and_then(|v| v.as_object().cloned())
    }

    /// Associate a game object with `seat`, e.g. the seat's player object.
    pub fn set_seat_object(&mut self, seat: usize, id: &ObjectId) -> Result<(), HandlerError> {
        if !self.registry.contains(id) {
            return Err(HandlerError::fault(format!("no game object with id `{id}`")));
        }
        if seat >= self.seat_count() {
            return Err(HandlerError::fault(format!("no seat {seat}")));
        }
        self.set_seat_field(seat, "gameObject", Value::from(id))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Manager-only mutation
    // -----------------------------------------------------------------------

    pub(crate) fn set_session(&mut self, key: &str, value: Value) -> Result<(), HandlerError> {
        self.graph.set(&path![SESSION, key], value)?;
        Ok(())
    }

    pub(crate) fn set_seat_field(
        &mut self,
        seat: usize,
        field: &str,
        value: Value,
    ) -> Result<(), HandlerError> {
        self.graph
            .set(&path![SESSION, "players", seat, field], value)?;
        Ok(())
    }

    pub(crate) fn add_seat(&mut self, name: &str) -> Result<usize, HandlerError> {
        let seat = self.seat_count();
        let time_bank = Value::from(i64::try_from(self.settings.time_bank_ms).unwrap_or(i64::MAX));
        self.graph.push(
            &path![SESSION, "players"],
            Value::map([
                ("name", Value::from(name)),
                ("ready", Value::Bool(false)),
                ("timeRemaining", time_bank),
                ("timedOut", Value::Bool(false)),
                ("disconnected", Value::Bool(false)),
                ("won", Value::Bool(false)),
                ("lost", Value::Bool(false)),
                ("reason", Value::from("")),
                ("gameObject", Value::Null),
            ]),
        )?;
        Ok(seat)
    }

    pub(crate) fn remove_seat(&mut self, seat: usize) -> Result<(), HandlerError> {
        self.graph
            .splice(&path![SESSION, "players"], seat, 1, Vec::new())?;
        Ok(())
    }

    /// Hand out everything recorded since the last flush and make it
    /// permanent.
    pub(crate) fn flush(&mut self) -> Vec<Delta> {
        self.registry.settle();
        self.graph.flush()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &[Delta] {
        self.graph.pending()
    }
}

/// Run `f` so that an error or panic leaves no trace: graph mutations since
/// the call are rolled back and objects it created are forgotten. A panic is
/// reported as a `HandlerError::Fault`.
pub fn guarded<T>(
    ctx: &mut GameContext,
    f: impl FnOnce(&mut GameContext) -> Result<T, HandlerError>,
) -> Result<T, HandlerError> {
    let checkpoint = ctx.graph.checkpoint();
    let mark = ctx.registry.mark();
    let result = match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Fault(panic_message(payload.as_ref()))),
    };
    if result.is_err() {
        ctx.graph.rollback(checkpoint)?;
        ctx.registry.release_since(mark);
    }
    result
}

/// Run read-only game code (validators, outcome checks), turning a panic into
/// a `HandlerError::Fault`.
pub fn inspect<T>(ctx: &GameContext, f: impl FnOnce(&GameContext) -> T) -> Result<T, HandlerError> {
    panic::catch_unwind(AssertUnwindSafe(|| f(ctx)))
        .map_err(|payload| HandlerError::Fault(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}
