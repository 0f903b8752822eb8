//! Transport adapters.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               Producer / Consumer contract               │
//! │  send(topic, outgoing) / open_reader(topics) → read()   │
//! └─────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌─────────────┐    ┌──────────────────┐    ┌─────────────┐
//! │QueueTransport│   │ StreamTransport  │    │PubSubTransport│
//! │ list push/pop│   │ log + groups     │    │ channels     │
//! └─────────────┘    └──────────────────┘    └─────────────┘
//! ```
//!
//! All three adapters expose the same capability surface; the stream adapter
//! additionally carries the consumer-group and log-management superset as
//! inherent methods rather than widening the shared traits.

mod pubsub;
mod queue;
mod stream;

pub use pubsub::PubSubTransport;
pub use queue::QueueTransport;
pub use stream::StreamTransport;

use std::collections::HashMap;
use std::time::Duration;

use crate::codec::FieldMap;
use crate::error::BusError;

/// Which backing structure a transport writes to and reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Queue,
    Stream,
    PubSub,
}

/// Wire form of one outgoing message.
#[derive(Clone, Debug)]
pub enum Outgoing {
    /// One opaque blob (queue and pub/sub transports).
    Raw(Vec<u8>),
    /// One flat field map (stream transport).
    Fields(FieldMap),
}

/// Wire form of one delivered message.
#[derive(Clone, Debug)]
pub enum Delivery {
    Raw { topic: String, payload: Vec<u8> },
    Entry { topic: String, id: String, fields: FieldMap },
}

/// When a delivered log entry counts as durably consumed by its group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The read itself acknowledges; nothing stays pending.
    OnReceive,
    /// The listener loop acknowledges after dispatching the entry.
    #[default]
    OnCompletion,
    /// The loop never acknowledges; a handler calls
    /// [`StreamTransport::acknowledge`] itself and unacknowledged entries
    /// stay claimable by other members.
    Manual,
}

/// Consumer-group membership for the stream transport.
///
/// Bound once per consumer and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupBinding {
    pub group: String,
    pub member: String,
    pub ack_mode: AckMode,
}

impl GroupBinding {
    pub fn new(group: impl Into<String>, member: impl Into<String>, ack_mode: AckMode) -> Self {
        Self {
            group: group.into(),
            member: member.into(),
            ack_mode,
        }
    }
}

/// Options for one transport write.
#[derive(Clone, Debug)]
pub struct PublishOptions {
    /// Explicit log entry id (stream only); the store assigns one otherwise.
    pub id: Option<String>,
    /// Create the log on first write (stream only).
    pub auto_create: bool,
    /// Trim the log to at most this many entries after writing (stream only).
    pub max_len: Option<u64>,
    /// Whether the max-length bound is strict (stream only).
    pub exact_trim: bool,
    /// Drop log entries older than this id after writing (stream only).
    pub min_id: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            id: None,
            auto_create: true,
            max_len: None,
            exact_trim: false,
            min_id: None,
        }
    }
}

impl PublishOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_len(mut self, limit: u64, exact: bool) -> Self {
        self.max_len = Some(limit);
        self.exact_trim = exact;
        self
    }

    pub fn with_min_id(mut self, id: impl Into<String>) -> Self {
        self.min_id = Some(id.into());
        self
    }
}

/// Options a reader is opened with.
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    /// Entries per topic and read call (stream only; zero = store default).
    pub count: usize,
    /// Explicit per-topic start positions (stream only).
    pub starts: HashMap<String, String>,
    /// Start position for topics without an explicit one (stream only).
    pub default_start: Option<String>,
    /// Consumer-group membership (stream only).
    pub group: Option<GroupBinding>,
}

/// One backing structure behind the shared producer/consumer contract.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Issue one write. Returns the assigned entry id for log writes.
    fn send(
        &self,
        topic: &str,
        outgoing: Outgoing,
        opts: &PublishOptions,
    ) -> Result<Option<String>, BusError>;

    /// Open a reader over `topics` for a listener loop to drive.
    fn open_reader(
        &self,
        topics: &[String],
        opts: ReaderOptions,
    ) -> Result<Box<dyn TransportReader>, BusError>;
}

/// A transport's read side, owned by exactly one listener loop.
///
/// The reader owns whatever position state the transport needs (the stream
/// reader's per-topic cursor table lives here), so the single-writer rule
/// holds by construction.
pub trait TransportReader: Send {
    /// One blocking read. Empty means no data before the timeout; an error
    /// is fatal to the loop.
    fn read(&mut self, block: Duration) -> Result<Vec<Delivery>, BusError>;

    /// How delivered entries get acknowledged, if at all.
    fn ack_mode(&self) -> AckMode {
        AckMode::Manual
    }

    /// Acknowledge one delivered entry. A no-op outside group reads.
    fn acknowledge(&mut self, topic: &str, id: &str) -> Result<(), BusError> {
        let _ = (topic, id);
        Ok(())
    }
}
