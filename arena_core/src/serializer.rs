// Type-directed marshalling between wire values and typed values.
//
// `cast` is the security boundary of the server: every order argument a
// remote client sends, and every attribute value game logic writes, goes
// through it before it can reach a handler or the property graph. Anything
// that doesn't fit the declared `TypeSpec` is rejected with a `CastError`;
// nothing is coerced silently beyond the documented conversions below.
//
// Accepted conversions:
// - `int`:      JSON integers, integral floats within i64 range, numeric
//               strings ("42").
// - `float`:    any JSON number, numeric strings with a finite value.
// - `boolean`:  booleans, the strings "true" / "false".
// - `string`:   strings; numbers and booleans are stringified.
// - `enum`:     strings from the declared literal set.
// - `list`/`map`: arrays / objects, element-wise.
// - `gameObject`: id strings or `{"id": ...}` objects that resolve in the
//               registry to an instance of the declared class; `null` only
//               when nullable.
//
// `flatten` is the inverse: object references become their id strings and
// containers recurse. Containers are owned (a tree) and cross-references are
// ids, so flattening never meets a cycle.

use std::collections::BTreeMap;

use arena_protocol::types::{ObjectId, WireValue};
use serde_json::Number;

use crate::error::CastError;
use crate::registry::Registry;
use crate::schema::{FieldSchema, TypeSpec};
use crate::value::Value;

/// Cast a wire value to the declared type.
pub fn cast(ty: &TypeSpec, wire: &WireValue, registry: &Registry) -> Result<Value, CastError> {
    match ty {
        TypeSpec::Boolean => cast_bool(wire),
        TypeSpec::Int => cast_int(wire),
        TypeSpec::Float => cast_float(wire),
        TypeSpec::String => cast_string(wire),
        TypeSpec::Enum { literals } => match wire {
            WireValue::String(s) if literals.iter().any(|l| l == s) => Ok(Value::String(s.clone())),
            _ => Err(CastError::validation(
                format!("one of [{}]", literals.join(", ")),
                describe(wire),
            )),
        },
        TypeSpec::List { element } => match wire {
            WireValue::Array(items) => items
                .iter()
                .map(|item| cast(element, item, registry))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            _ => Err(CastError::validation("list", describe(wire))),
        },
        TypeSpec::Map { value } => match wire {
            WireValue::Object(entries) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), cast(value, v, registry)?)))
                .collect::<Result<BTreeMap<_, _>, CastError>>()
                .map(Value::Map),
            _ => Err(CastError::validation("map", describe(wire))),
        },
        TypeSpec::GameObject { class, nullable } => {
            cast_object(class.as_deref(), *nullable, wire, registry)
        }
        TypeSpec::Any => Ok(untyped(wire)),
    }
}

/// Cast a possibly-absent value. Absent values take the cast `default`, or
/// the type's zero value if there is no declared default.
pub fn cast_or_default(
    ty: &TypeSpec,
    wire: Option<&WireValue>,
    default: Option<&WireValue>,
    registry: &Registry,
) -> Result<Value, CastError> {
    match (wire, default) {
        (Some(wire), _) => cast(ty, wire, registry),
        (None, Some(default)) => cast(ty, default, registry),
        (None, None) => Ok(default_for(ty)),
    }
}

/// Cast a declared argument. A missing optional argument never fails; a
/// missing required one is `CastError::Missing`.
pub fn cast_field(
    field: &FieldSchema,
    wire: Option<&WireValue>,
    registry: &Registry,
) -> Result<Value, CastError> {
    if wire.is_none() && !field.optional {
        return Err(CastError::Missing);
    }
    cast_or_default(&field.ty, wire, field.default.as_ref(), registry)
}

/// Zero value of a type, used when nothing better is declared.
pub fn default_for(ty: &TypeSpec) -> Value {
    match ty {
        TypeSpec::Boolean => Value::Bool(false),
        TypeSpec::Int => Value::Int(0),
        TypeSpec::Float => Value::Float(0.0),
        TypeSpec::String => Value::String(String::new()),
        TypeSpec::Enum { literals } => {
            Value::String(literals.first().cloned().unwrap_or_default())
        }
        TypeSpec::List { .. } => Value::List(Vec::new()),
        TypeSpec::Map { .. } => Value::Map(BTreeMap::new()),
        TypeSpec::GameObject { .. } | TypeSpec::Any => Value::Null,
    }
}

/// Convert a typed value to its wire form.
pub fn flatten(value: &Value) -> WireValue {
    match value {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(i) => WireValue::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map_or(WireValue::Null, WireValue::Number),
        Value::String(s) => WireValue::String(s.clone()),
        Value::List(items) => WireValue::Array(items.iter().map(flatten).collect()),
        Value::Map(entries) => WireValue::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), flatten(v)))
                .collect(),
        ),
        Value::Object(id) => WireValue::String(id.0.clone()),
    }
}

/// Structural conversion without type checks. Strings stay strings; there is
/// no way to tell an id from text without a declared type.
pub fn untyped(wire: &WireValue) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::Array(items) => Value::List(items.iter().map(untyped).collect()),
        WireValue::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), untyped(v)))
                .collect(),
        ),
    }
}

fn cast_bool(wire: &WireValue) -> Result<Value, CastError> {
    match wire {
        WireValue::Bool(b) => Ok(Value::Bool(*b)),
        WireValue::String(s) if s == "true" => Ok(Value::Bool(true)),
        WireValue::String(s) if s == "false" => Ok(Value::Bool(false)),
        _ => Err(CastError::validation("boolean", describe(wire))),
    }
}

/// Largest magnitude (exclusive) an f64 may have and still convert to i64
/// without saturating: 2^63.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn cast_int(wire: &WireValue) -> Result<Value, CastError> {
    let parsed = match wire {
        WireValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= -I64_LIMIT && *f < I64_LIMIT)
                .map(|f| f as i64)
        }),
        WireValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Value::Int)
        .ok_or_else(|| CastError::validation("int", describe(wire)))
}

fn cast_float(wire: &WireValue) -> Result<Value, CastError> {
    let parsed = match wire {
        WireValue::Number(n) => n.as_f64(),
        WireValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .map(Value::Float)
        .ok_or_else(|| CastError::validation("float", describe(wire)))
}

fn cast_string(wire: &WireValue) -> Result<Value, CastError> {
    match wire {
        WireValue::String(s) => Ok(Value::String(s.clone())),
        WireValue::Number(n) => Ok(Value::String(n.to_string())),
        WireValue::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err(CastError::validation("string", describe(wire))),
    }
}

fn cast_object(
    class: Option<&str>,
    nullable: bool,
    wire: &WireValue,
    registry: &Registry,
) -> Result<Value, CastError> {
    let expected = || match class {
        Some(c) => format!("{c} reference"),
        None => "game object reference".to_owned(),
    };
    let id = match wire {
        WireValue::Null if nullable => return Ok(Value::Null),
        WireValue::String(s) => s.as_str(),
        WireValue::Object(entries) => match entries.get("id") {
            Some(WireValue::String(s)) => s.as_str(),
            _ => return Err(CastError::validation(expected(), describe(wire))),
        },
        _ => return Err(CastError::validation(expected(), describe(wire))),
    };
    let id = ObjectId::from(id);
    let object = registry
        .get(&id)
        .ok_or_else(|| CastError::UnresolvedReference(id.clone()))?;
    if let Some(class) = class {
        if !object.is_a(class) {
            return Err(CastError::validation(
                expected(),
                format!("{} `{id}`", object.class()),
            ));
        }
    }
    Ok(Value::Object(id))
}

/// Short description of a wire value for error messages. Long strings are
/// truncated so a hostile client can't make us echo megabytes.
fn describe(wire: &WireValue) -> String {
    const MAX_ECHO: usize = 32;
    match wire {
        WireValue::Null => "null".to_owned(),
        WireValue::Bool(b) => format!("boolean {b}"),
        WireValue::Number(n) => format!("number {n}"),
        WireValue::String(s) if s.chars().count() > MAX_ECHO => {
            let head: String = s.chars().take(MAX_ECHO).collect();
            format!("string \"{head}...\"")
        }
        WireValue::String(s) => format!("string \"{s}\""),
        WireValue::Array(items) => format!("list of {}", items.len()),
        WireValue::Object(_) => "map".to_owned(),
    }
}
