// Handler bindings for remotely callable functions.
//
// The schema declares which functions exist on which classes; game code binds
// a handler (and optionally a validator) to each of them. The binding is
// checked once when a session is created: every declared function needs a
// handler, and no handler may name a function the schema doesn't declare.
//
// Lookup walks the target object's class lineage nearest first, so a
// subclass can override an inherited function's handler by binding the same
// name on itself.
//
// A validator is a read-only pre-check. Returning `Some(reason)` rejects the
// order with the function's declared invalid value; the handler never runs.

use std::collections::BTreeMap;

use arena_protocol::types::{ClientId, ObjectId};

use crate::context::GameContext;
use crate::error::{HandlerError, SchemaError};
use crate::schema::GameSchema;
use crate::value::Value;

/// One dispatched call, as seen by a handler. Arguments are already cast to
/// their declared types.
#[derive(Debug)]
pub struct Call<'a> {
    pub client: ClientId,
    /// Seat of the calling player.
    pub seat: usize,
    /// The object the function was invoked on.
    pub this: &'a ObjectId,
    pub args: &'a BTreeMap<String, Value>,
}

impl Call<'_> {
    pub fn arg(&self, name: &str) -> &Value {
        self.args.get(name).unwrap_or(&Value::Null)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.arg(name).as_int()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.arg(name).as_bool()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.arg(name).as_str()
    }

    pub fn object(&self, name: &str) -> Option<&ObjectId> {
        self.arg(name).as_object()
    }
}

/// Function body. `Ok(None)` means "return the declared default".
pub type Handler =
    Box<dyn Fn(&mut GameContext, &Call<'_>) -> Result<Option<Value>, HandlerError> + Send>;

/// Read-only pre-check. `Some(reason)` rejects the order.
pub type Validator = Box<dyn Fn(&GameContext, &Call<'_>) -> Option<String> + Send>;

/// A bound function: handler plus optional validator.
pub struct Binding {
    pub handler: Handler,
    pub validator: Option<Validator>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct DispatchTable {
    bindings: BTreeMap<(String, String), Binding>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Find the binding for `function` on the nearest class in `lineage`
    /// that has one. Returns the class it was found on.
    pub fn lookup<'a>(&'a self, lineage: &'a [String], function: &str) -> Option<(&'a str, &'a Binding)> {
        lineage.iter().find_map(|class| {
            self.bindings
                .get(&(class.clone(), function.to_owned()))
                .map(|binding| (class.as_str(), binding))
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: BTreeMap<(String, String), Handler>,
    validators: BTreeMap<(String, String), Validator>,
}

impl DispatchTableBuilder {
    pub fn handler<F>(&mut self, class: &str, function: &str, f: F) -> &mut Self
    where
        F: Fn(&mut GameContext, &Call<'_>) -> Result<Option<Value>, HandlerError> + Send + 'static,
    {
        self.handlers
            .insert((class.to_owned(), function.to_owned()), Box::new(f));
        self
    }

    pub fn validator<F>(&mut self, class: &str, function: &str, f: F) -> &mut Self
    where
        F: Fn(&GameContext, &Call<'_>) -> Option<String> + Send + 'static,
    {
        self.validators
            .insert((class.to_owned(), function.to_owned()), Box::new(f));
        self
    }

    /// Check the bindings against `schema` and produce the table.
    pub fn build(self, schema: &GameSchema) -> Result<DispatchTable, SchemaError> {
        for key in self.handlers.keys().chain(self.validators.keys()) {
            let (class, function) = key;
            let declared = schema
                .classes
                .get(class)
                .is_some_and(|c| c.functions.contains_key(function));
            if !declared {
                return Err(SchemaError::UndeclaredHandler {
                    class: class.clone(),
                    function: function.clone(),
                });
            }
        }
        for (class, class_schema) in &schema.classes {
            for function in class_schema.functions.keys() {
                if !self.handlers.contains_key(&(class.clone(), function.clone())) {
                    return Err(SchemaError::MissingHandler {
                        class: class.clone(),
                        function: function.clone(),
                    });
                }
            }
        }

        let mut validators = self.validators;
        let bindings = self
            .handlers
            .into_iter()
            .map(|(key, handler)| {
                let validator = validators.remove(&key);
                (key, Binding { handler, validator })
            })
            .collect();
        Ok(DispatchTable { bindings })
    }
}
