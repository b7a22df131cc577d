// Per-game schema: types, attributes and callable functions.
//
// A `GameSchema` is pure data, normally produced by a game's code generator
// and loaded from JSON. The core never hardcodes a game's rules: everything
// it validates (order arguments, handler return values, attribute writes)
// is checked against this schema.
//
// Classes form a single-inheritance tree. Attributes and functions are
// inherited; a subclass may not redeclare the built-in `id` and
// `gameObjectName` attributes that every game object carries.
//
// See also: `serializer.rs` for how each `TypeSpec` is enforced,
// `dispatch.rs` for binding handlers to the declared functions.

use std::collections::BTreeMap;

use arena_protocol::types::WireValue;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::registry::Registry;
use crate::serializer;

/// Attribute every game object carries: its id.
pub const ID_ATTRIBUTE: &str = "id";
/// Attribute every game object carries: the name of its class.
pub const CLASS_ATTRIBUTE: &str = "gameObjectName";

/// Declared type of an argument, return value or attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TypeSpec {
    Boolean,
    Int,
    Float,
    String,
    Enum {
        literals: Vec<String>,
    },
    List {
        element: Box<TypeSpec>,
    },
    /// String-keyed map.
    Map {
        value: Box<TypeSpec>,
    },
    /// Reference to a game object, optionally restricted to a class (or its
    /// subclasses).
    GameObject {
        #[serde(default)]
        class: Option<String>,
        #[serde(default)]
        nullable: bool,
    },
    /// Unchecked structural value. Only for data the core itself produces.
    Any,
}

impl TypeSpec {
    pub fn list(element: TypeSpec) -> Self {
        TypeSpec::List {
            element: Box::new(element),
        }
    }

    pub fn map(value: TypeSpec) -> Self {
        TypeSpec::Map {
            value: Box::new(value),
        }
    }

    pub fn object(class: &str) -> Self {
        TypeSpec::GameObject {
            class: Some(class.to_owned()),
            nullable: false,
        }
    }

    pub fn nullable_object(class: &str) -> Self {
        TypeSpec::GameObject {
            class: Some(class.to_owned()),
            nullable: true,
        }
    }

    pub fn literals<S: Into<String>>(literals: impl IntoIterator<Item = S>) -> Self {
        TypeSpec::Enum {
            literals: literals.into_iter().map(Into::into).collect(),
        }
    }
}

/// One declared function argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeSpec,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<WireValue>,
}

impl FieldSchema {
    pub fn required(name: &str, ty: TypeSpec) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            optional: false,
            default: None,
        }
    }

    pub fn optional(name: &str, ty: TypeSpec, default: WireValue) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            optional: true,
            default: Some(default),
        }
    }
}

/// Declared return of a function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnSchema {
    #[serde(rename = "type")]
    pub ty: TypeSpec,
    /// Returned when the handler produces nothing.
    #[serde(default)]
    pub default: Option<WireValue>,
    /// Returned when the order is judged invalid or the handler's result
    /// does not fit `ty`.
    #[serde(default)]
    pub invalid_value: Option<WireValue>,
}

impl ReturnSchema {
    pub fn new(ty: TypeSpec, default: WireValue, invalid_value: WireValue) -> Self {
        Self {
            ty,
            default: Some(default),
            invalid_value: Some(invalid_value),
        }
    }

    /// A function that returns nothing useful.
    pub fn void() -> Self {
        Self {
            ty: TypeSpec::Any,
            default: None,
            invalid_value: None,
        }
    }
}

/// A remotely callable function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    #[serde(default)]
    pub arguments: Vec<FieldSchema>,
    pub returns: ReturnSchema,
}

impl FunctionSchema {
    pub fn new(arguments: Vec<FieldSchema>, returns: ReturnSchema) -> Self {
        Self { arguments, returns }
    }
}

/// A tracked attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    #[serde(rename = "type")]
    pub ty: TypeSpec,
    #[serde(default)]
    pub default: Option<WireValue>,
}

impl AttributeSchema {
    pub fn new(ty: TypeSpec) -> Self {
        Self { ty, default: None }
    }

    pub fn with_default(ty: TypeSpec, default: WireValue) -> Self {
        Self {
            ty,
            default: Some(default),
        }
    }
}

/// A game-object class.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassSchema {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSchema>,
}

impl ClassSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_owned());
        self
    }

    pub fn attribute(mut self, name: &str, attr: AttributeSchema) -> Self {
        self.attributes.insert(name.to_owned(), attr);
        self
    }

    pub fn function(mut self, name: &str, function: FunctionSchema) -> Self {
        self.functions.insert(name.to_owned(), function);
        self
    }
}

/// Everything the core knows about one game.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSchema {
    pub name: String,
    #[serde(default)]
    pub game_attributes: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    pub classes: BTreeMap<String, ClassSchema>,
}

impl GameSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn game_attribute(mut self, name: &str, attr: AttributeSchema) -> Self {
        self.game_attributes.insert(name.to_owned(), attr);
        self
    }

    pub fn class(mut self, name: &str, class: ClassSchema) -> Self {
        self.classes.insert(name.to_owned(), class);
        self
    }

    /// Check internal consistency: known parents, no inheritance cycles, no
    /// reserved attribute names, and every default fits its type.
    pub fn validate(&self) -> Result<(), SchemaError> {
        // Defaults may not reference objects, so an empty registry suffices.
        let registry = Registry::new();
        for (name, attr) in &self.game_attributes {
            check_default(&self.name, name, &attr.ty, attr.default.as_ref(), &registry)?;
        }
        for (class_name, class) in &self.classes {
            self.lineage(class_name)?;
            for (name, attr) in &class.attributes {
                if name == ID_ATTRIBUTE || name == CLASS_ATTRIBUTE {
                    return Err(SchemaError::ReservedAttribute {
                        class: class_name.clone(),
                        name: name.clone(),
                    });
                }
                check_default(class_name, name, &attr.ty, attr.default.as_ref(), &registry)?;
            }
            for (fn_name, function) in &class.functions {
                let owner = format!("{class_name}.{fn_name}");
                for arg in &function.arguments {
                    check_default(&owner, &arg.name, &arg.ty, arg.default.as_ref(), &registry)?;
                }
                let ret = &function.returns;
                check_default(&owner, "return", &ret.ty, ret.default.as_ref(), &registry)?;
                check_default(&owner, "invalid", &ret.ty, ret.invalid_value.as_ref(), &registry)?;
            }
        }
        Ok(())
    }

    /// The class followed by its ancestors, nearest first.
    pub fn lineage(&self, class: &str) -> Result<Vec<String>, SchemaError> {
        let mut lineage: Vec<String> = Vec::new();
        let mut current = Some(class.to_owned());
        while let Some(name) = current {
            if lineage.contains(&name) {
                return Err(SchemaError::InheritanceCycle(name));
            }
            let schema = self
                .classes
                .get(&name)
                .ok_or_else(|| SchemaError::UnknownClass(name.clone()))?;
            current = schema.parent.clone();
            lineage.push(name);
        }
        Ok(lineage)
    }

    /// Look up an attribute declared on `class` or an ancestor.
    pub fn attribute(&self, class: &str, name: &str) -> Option<&AttributeSchema> {
        self.walk(class)
            .find_map(|schema| schema.attributes.get(name))
    }

    /// Look up a function declared on `class` or an ancestor.
    pub fn function(&self, class: &str, name: &str) -> Option<&FunctionSchema> {
        self.walk(class).find_map(|schema| schema.functions.get(name))
    }

    /// All attributes of `class`, inherited ones included.
    pub fn attributes_of(&self, class: &str) -> BTreeMap<&str, &AttributeSchema> {
        let mut all = BTreeMap::new();
        for schema in self.walk(class) {
            for (name, attr) in &schema.attributes {
                all.entry(name.as_str()).or_insert(attr);
            }
        }
        all
    }

    /// Iterate a class and its ancestors. Stops at unknown classes and
    /// guards against cycles (which `validate` rejects anyway).
    fn walk<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a ClassSchema> + 'a {
        let mut current = self.classes.get(class);
        let mut remaining = self.classes.len();
        std::iter::from_fn(move || {
            let schema = current?;
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            current = schema.parent.as_deref().and_then(|p| self.classes.get(p));
            Some(schema)
        })
    }
}

fn check_default(
    owner: &str,
    name: &str,
    ty: &TypeSpec,
    default: Option<&WireValue>,
    registry: &Registry,
) -> Result<(), SchemaError> {
    if let Some(default) = default {
        serializer::cast(ty, default, registry).map_err(|source| SchemaError::BadDefault {
            owner: owner.to_owned(),
            name: name.to_owned(),
            source,
        })?;
    }
    Ok(())
}
