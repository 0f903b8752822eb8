//! kvbus - Messaging over a key-value store's primitives
//!
//! Unifies three delivery models behind one producer/consumer contract:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │              Producer            Consumer                     │
//! │  publish() / publish_event()     register() / listen()       │
//! └──────────────────────────────────────────────────────────────┘
//!               │                          │
//!               ▼                          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │        Transport adapters (Queue / Stream / PubSub)          │
//! └──────────────────────────────────────────────────────────────┘
//!               │
//!               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   StoreClient (list, log + consumer groups, channels)        │
//! │   MemoryStore (included)   network clients (external)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Queue**: list-backed, FIFO, each message to exactly one consumer.
//! - **Stream**: log-backed, at-least-once, with consumer groups, per-topic
//!   cursors, and acknowledgement modes.
//! - **PubSub**: channel-backed fan-out, no persistence.
//!
//! Payloads are [`Value`]s carried losslessly across transports whose native
//! fields are flat strings or opaque bytes, using a JSON or compact binary
//! protocol plus a documented type-recovery heuristic for untyped fields.

mod codec;
mod consumer;
mod error;
mod event;
mod producer;
mod registry;
mod value;

pub mod store;
pub mod transport;

pub use codec::{
    decode_field, encode_payload, recover_scalar, to_field_map, FieldMap, Protocol, PAYLOAD_FIELD,
};
pub use consumer::{Consumer, ConsumerOptions, ListenOptions};
pub use error::BusError;
pub use event::{Event, EventParser, EVENT_TIME_FIELD, SENDER_FIELD};
pub use producer::{IdStrategy, Producer, ProducerOptions};
pub use registry::{HandlerRegistry, HandlerResult, WILDCARD_TOPIC};
pub use transport::{AckMode, GroupBinding, PublishOptions};
pub use value::Value;
