//! Payload values carried through the bus.
//!
//! The underlying store has no type tags for the flat fields it persists, so
//! payloads are modeled as a closed variant set rather than open-ended
//! dynamic data. Sequences are accepted only as raw byte payloads; anything
//! outside this set is unrepresentable by construction.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// A payload value: one of the scalar kinds or a string-keyed map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Whether this value is a scalar (everything except `Map`).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Map(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(m: HashMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// Convert a value to its natural JSON form.
///
/// Byte payloads become base64 strings, matching how byte sequences survive a
/// text protocol that has no binary type. Non-finite floats cannot be
/// represented in JSON and are rejected.
pub(crate) fn to_json(value: &Value) -> Result<serde_json::Value, String> {
    match value {
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(i) => Ok(serde_json::Value::Number((*i).into())),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| format!("non-finite float {} has no JSON form", f)),
        Value::Str(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Bytes(b) => Ok(serde_json::Value::String(STANDARD.encode(b))),
        Value::Map(m) => {
            let mut object = serde_json::Map::with_capacity(m.len());
            for (k, v) in m {
                object.insert(k.clone(), to_json(v)?);
            }
            Ok(serde_json::Value::Object(object))
        }
    }
}

/// Convert natural JSON back into a value.
///
/// Returns `None` for JSON shapes outside the closed variant set: nulls, and
/// arrays that are not byte sequences.
pub(crate) fn from_json(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        serde_json::Value::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let b = item.as_u64().filter(|b| *b <= u8::MAX as u64)?;
                bytes.push(b as u8);
            }
            Some(Value::Bytes(bytes))
        }
        serde_json::Value::Object(object) => {
            let mut map = HashMap::with_capacity(object.len());
            for (k, v) in object {
                map.insert(k.clone(), from_json(v)?);
            }
            Some(Value::Map(map))
        }
    }
}
