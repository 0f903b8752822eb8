//! Payload codec — converts values to and from wire form.
//!
//! Two interchangeable protocols: a text codec (JSON) and a compact binary
//! codec (bitcode). Scalars always encode to their literal textual or byte
//! form regardless of protocol; only structured values pass through the
//! protocol serializer. For transports that store flat fields, a map is
//! flattened one level: scalar entries become literal fields, structured
//! entries keep their full serialized form, and the decoder inverts both.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::BusError;
use crate::value::{from_json, to_json, Value};

/// Serialization protocol for structured payloads and event envelopes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Text protocol: JSON via `serde_json`.
    #[default]
    Json,
    /// Compact binary protocol: `bitcode`.
    Binary,
}

impl FromStr for Protocol {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Protocol::Json),
            "binary" => Ok(Protocol::Binary),
            other => Err(BusError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Flat field map as the store persists it. Values are binary-safe.
pub type FieldMap = HashMap<String, Vec<u8>>;

/// Reserved field name holding a scalar payload in field-mapped transports.
pub const PAYLOAD_FIELD: &str = "payload";

/// Encode a payload for transports that carry one opaque blob per message.
///
/// Scalars take their literal form; maps serialize via `protocol`.
pub fn encode_payload(protocol: Protocol, value: &Value) -> Result<Vec<u8>, BusError> {
    match value {
        Value::Bool(b) => Ok(if *b { b"true".to_vec() } else { b"false".to_vec() }),
        Value::Int(i) => Ok(i.to_string().into_bytes()),
        Value::Float(f) => Ok(f.to_string().into_bytes()),
        Value::Str(s) => Ok(s.clone().into_bytes()),
        Value::Bytes(b) => Ok(b.clone()),
        Value::Map(_) => serialize(protocol, value),
    }
}

/// Encode a payload for transports that carry flat fields per message.
///
/// A map flattens one level; a scalar becomes a single [`PAYLOAD_FIELD`]
/// entry holding its literal form.
pub fn to_field_map(protocol: Protocol, value: &Value) -> Result<FieldMap, BusError> {
    match value {
        Value::Map(m) => {
            let mut fields = FieldMap::with_capacity(m.len());
            for (k, v) in m {
                fields.insert(k.clone(), encode_payload(protocol, v)?);
            }
            Ok(fields)
        }
        scalar => {
            let mut fields = FieldMap::with_capacity(1);
            fields.insert(PAYLOAD_FIELD.to_string(), encode_payload(protocol, scalar)?);
            Ok(fields)
        }
    }
}

/// Decode one field back into a value.
///
/// A protocol decode is accepted only when it yields a map (the container
/// form a structured field was written in); everything else goes through the
/// type-recovery heuristic, so scalar literals decode the same way no matter
/// which protocol produced the surrounding message.
pub fn decode_field(protocol: Protocol, raw: &[u8]) -> Value {
    deserialize_map(protocol, raw).unwrap_or_else(|| recover_scalar(raw))
}

/// Recover a scalar from its literal form.
///
/// The store keeps no type tags, so typing is recovered by a fixed fallback
/// order: non-UTF-8 stays bytes; the literals `true`/`false` become booleans;
/// then integer, then float; a string only when nothing else matches. The
/// order is observable to callers and must not change.
pub fn recover_scalar(raw: &[u8]) -> Value {
    let s = match std::str::from_utf8(raw) {
        Ok(s) => s,
        Err(_) => return Value::Bytes(raw.to_vec()),
    };
    match s {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Str(s.to_string())
}

pub(crate) fn serialize(protocol: Protocol, value: &Value) -> Result<Vec<u8>, BusError> {
    match protocol {
        Protocol::Json => {
            let json = to_json(value).map_err(BusError::Encode)?;
            serde_json::to_vec(&json).map_err(|e| BusError::Encode(e.to_string()))
        }
        Protocol::Binary => {
            bitcode::serialize(value).map_err(|e| BusError::Encode(e.to_string()))
        }
    }
}

fn deserialize_map(protocol: Protocol, raw: &[u8]) -> Option<Value> {
    let value = match protocol {
        Protocol::Json => from_json(&serde_json::from_slice::<serde_json::Value>(raw).ok()?)?,
        Protocol::Binary => bitcode::deserialize::<Value>(raw).ok()?,
    };
    match value {
        Value::Map(_) => Some(value),
        _ => None,
    }
}
