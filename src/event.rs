//! Event envelope and wire parsing.
//!
//! An [`Event`] wraps a payload with its topic, an optional sender identity,
//! a millisecond timestamp, and — for the log-backed transport only — the
//! entry id, which doubles as the log cursor. [`EventParser`] reconstructs
//! events from the two wire shapes the transports produce: one opaque blob
//! per message (queue, pub/sub) or one flat field map per entry (stream).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::codec::{self, FieldMap, Protocol, PAYLOAD_FIELD};
use crate::error::BusError;
use crate::value::{from_json, to_json, Value};

/// Reserved field carrying the sender identity on field-mapped transports.
pub const SENDER_FIELD: &str = "sender";
/// Reserved field carrying the event timestamp on field-mapped transports.
pub const EVENT_TIME_FIELD: &str = "event_time";

/// The canonical message envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Topic the event was published to or received from.
    pub topic: String,
    /// Identity of the publishing producer, when configured.
    pub sender: Option<String>,
    /// Unix timestamp in milliseconds.
    pub event_time: i64,
    /// Log entry id. Set if and only if the event originated from (or
    /// targets) the stream transport.
    pub id: Option<String>,
    /// The payload.
    pub payload: Value,
}

impl Event {
    /// Create an event for `topic` stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            sender: None,
            event_time: now_millis(),
            id: None,
            payload,
        }
    }

    /// Set the sender identity.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Stable wire form of an envelope for the binary protocol.
#[derive(Serialize, Deserialize)]
struct WireEvent {
    topic: String,
    sender: String,
    event_time: i64,
    payload: Value,
}

/// Serialize an envelope for transports that carry one blob per message.
pub(crate) fn encode_envelope(protocol: Protocol, event: &Event) -> Result<Vec<u8>, BusError> {
    let sender = event.sender.clone().unwrap_or_default();
    match protocol {
        Protocol::Json => {
            let mut object = serde_json::Map::with_capacity(4);
            object.insert("topic".to_string(), event.topic.clone().into());
            object.insert("sender".to_string(), sender.into());
            object.insert("event_time".to_string(), event.event_time.into());
            object.insert(
                "payload".to_string(),
                to_json(&event.payload).map_err(BusError::Encode)?,
            );
            serde_json::to_vec(&serde_json::Value::Object(object))
                .map_err(|e| BusError::Encode(e.to_string()))
        }
        Protocol::Binary => {
            let wire = WireEvent {
                topic: event.topic.clone(),
                sender,
                event_time: event.event_time,
                payload: event.payload.clone(),
            };
            bitcode::serialize(&wire).map_err(|e| BusError::Encode(e.to_string()))
        }
    }
}

/// Reconstructs events from wire data for one configured protocol.
#[derive(Clone, Copy, Debug)]
pub struct EventParser {
    protocol: Protocol,
}

impl EventParser {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    /// Parse a message that arrived as one opaque blob (queue, pub/sub).
    ///
    /// Tries the serialized envelope first; a decode that fails or carries a
    /// zero timestamp is treated as a bare payload and decoded through the
    /// structured-then-scalar fallback chain. A non-empty caller topic
    /// overrides any topic embedded in the envelope.
    pub fn parse_raw(&self, topic: &str, raw: &[u8]) -> Result<Event, BusError> {
        if let Some(mut event) = self.try_envelope(raw) {
            if event.event_time != 0 {
                if !topic.is_empty() {
                    event.topic = topic.to_string();
                }
                return Ok(event);
            }
        }
        Ok(Event {
            topic: topic.to_string(),
            sender: None,
            event_time: now_millis(),
            id: None,
            payload: codec::decode_field(self.protocol, raw),
        })
    }

    /// Parse a log entry that arrived as a flat field map (stream).
    ///
    /// The reserved `sender` and `event_time` fields move onto the envelope.
    /// A lone `payload` field becomes the payload directly; with other
    /// fields present, every field decodes individually into a payload map.
    pub fn parse_entry(
        &self,
        topic: &str,
        id: &str,
        mut fields: FieldMap,
    ) -> Result<Event, BusError> {
        let sender = fields
            .remove(SENDER_FIELD)
            .and_then(|raw| String::from_utf8(raw).ok())
            .filter(|s| !s.is_empty());

        let event_time = match fields.remove(EVENT_TIME_FIELD) {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    BusError::Parse(format!("entry {}: malformed {} field", id, EVENT_TIME_FIELD))
                })?,
            None => now_millis(),
        };

        let payload_field = fields
            .remove(PAYLOAD_FIELD)
            .map(|raw| codec::decode_field(self.protocol, &raw));

        let payload = if fields.is_empty() {
            payload_field.unwrap_or_else(|| Value::Map(HashMap::new()))
        } else {
            let mut map: HashMap<String, Value> = fields
                .into_iter()
                .map(|(name, raw)| {
                    let value = codec::decode_field(self.protocol, &raw);
                    (name, value)
                })
                .collect();
            if let Some(value) = payload_field {
                map.insert(PAYLOAD_FIELD.to_string(), value);
            }
            Value::Map(map)
        };

        Ok(Event {
            topic: topic.to_string(),
            sender,
            event_time,
            id: Some(id.to_string()),
            payload,
        })
    }

    fn try_envelope(&self, raw: &[u8]) -> Option<Event> {
        match self.protocol {
            Protocol::Json => {
                let json = serde_json::from_slice::<serde_json::Value>(raw).ok()?;
                let object = json.as_object()?;
                let topic = object.get("topic")?.as_str()?.to_string();
                let event_time = object.get("event_time")?.as_i64()?;
                let payload = from_json(object.get("payload")?)?;
                let sender = object
                    .get("sender")
                    .and_then(|s| s.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Some(Event {
                    topic,
                    sender,
                    event_time,
                    id: None,
                    payload,
                })
            }
            Protocol::Binary => {
                let wire = bitcode::deserialize::<WireEvent>(raw).ok()?;
                Some(Event {
                    topic: wire.topic,
                    sender: Some(wire.sender).filter(|s| !s.is_empty()),
                    event_time: wire.event_time,
                    id: None,
                    payload: wire.payload,
                })
            }
        }
    }
}
