//! Producer — publishes payloads and events onto one transport.

use std::sync::Arc;

use uuid::Uuid;

use crate::codec::{self, Protocol};
use crate::error::BusError;
use crate::event::{self, Event, EVENT_TIME_FIELD, SENDER_FIELD};
use crate::transport::{Outgoing, PublishOptions, Transport, TransportKind};
use crate::value::Value;

/// How publish_event picks log entry ids on the stream transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// Let the store assign the id on append.
    #[default]
    ServerAssigned,
    /// Generate a random id client-side.
    Random,
    /// Generate a time-ordered id client-side.
    TimeOrdered,
}

impl IdStrategy {
    fn generate(self) -> Option<String> {
        match self {
            IdStrategy::ServerAssigned => None,
            IdStrategy::Random => Some(Uuid::new_v4().to_string()),
            IdStrategy::TimeOrdered => Some(Uuid::now_v7().to_string()),
        }
    }
}

/// Producer configuration.
#[derive(Clone, Debug, Default)]
pub struct ProducerOptions {
    /// Serialization protocol for structured payloads and envelopes.
    pub protocol: Protocol,
    /// Sender identity stamped onto published events.
    pub sender: Option<String>,
    /// Entry id strategy for the stream transport.
    pub id_strategy: IdStrategy,
    /// Default max-length bound applied when a publish call sets none.
    pub max_len: Option<u64>,
    /// Whether the default max-length bound is strict.
    pub exact_trim: bool,
}

impl ProducerOptions {
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_max_len(mut self, limit: u64, exact: bool) -> Self {
        self.max_len = Some(limit);
        self.exact_trim = exact;
        self
    }
}

/// Publishes onto one transport. Cheap to share across threads; every call
/// is one remote write with no client-side buffering.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use kvbus::store::MemoryStore;
/// use kvbus::transport::QueueTransport;
/// use kvbus::{Producer, ProducerOptions, PublishOptions, Value};
///
/// let store = Arc::new(MemoryStore::new());
/// let producer = Producer::new(
///     Arc::new(QueueTransport::new(store)),
///     ProducerOptions::default(),
/// );
/// producer.publish("jobs", &Value::Int(1), &PublishOptions::default()).unwrap();
/// ```
pub struct Producer<T: Transport> {
    transport: Arc<T>,
    options: ProducerOptions,
}

impl<T: Transport> Producer<T> {
    pub fn new(transport: Arc<T>, options: ProducerOptions) -> Self {
        Self { transport, options }
    }

    /// Publish a bare payload. Returns the assigned entry id on the stream
    /// transport, `None` elsewhere.
    pub fn publish(
        &self,
        topic: &str,
        payload: &Value,
        opts: &PublishOptions,
    ) -> Result<Option<String>, BusError> {
        let outgoing = match self.transport.kind() {
            TransportKind::Stream => {
                Outgoing::Fields(codec::to_field_map(self.options.protocol, payload)?)
            }
            TransportKind::Queue | TransportKind::PubSub => {
                Outgoing::Raw(codec::encode_payload(self.options.protocol, payload)?)
            }
        };
        self.transport.send(topic, outgoing, &self.effective(opts))
    }

    /// Wrap `payload` in an event stamped with the current time and the
    /// configured sender, publish it, and return the constructed event so
    /// the caller can correlate the delivery. On the stream transport the
    /// returned event carries the entry id that ended up in the log.
    pub fn publish_event(
        &self,
        topic: &str,
        payload: Value,
        opts: &PublishOptions,
    ) -> Result<Event, BusError> {
        let mut event = Event {
            topic: topic.to_string(),
            sender: self.options.sender.clone(),
            event_time: event::now_millis(),
            id: None,
            payload,
        };
        let opts = self.effective(opts);

        match self.transport.kind() {
            TransportKind::Queue | TransportKind::PubSub => {
                let raw = event::encode_envelope(self.options.protocol, &event)?;
                self.transport.send(topic, Outgoing::Raw(raw), &opts)?;
            }
            TransportKind::Stream => {
                event.id = opts.id.clone().or_else(|| self.options.id_strategy.generate());

                let mut fields = codec::to_field_map(self.options.protocol, &event.payload)?;
                if let Some(sender) = &event.sender {
                    fields.insert(SENDER_FIELD.to_string(), sender.clone().into_bytes());
                }
                fields.insert(
                    EVENT_TIME_FIELD.to_string(),
                    event.event_time.to_string().into_bytes(),
                );

                let send_opts = PublishOptions {
                    id: event.id.clone(),
                    ..opts
                };
                if let Some(assigned) =
                    self.transport.send(topic, Outgoing::Fields(fields), &send_opts)?
                {
                    event.id = Some(assigned);
                }
            }
        }
        Ok(event)
    }

    /// Fill producer-level defaults into per-call options.
    fn effective(&self, opts: &PublishOptions) -> PublishOptions {
        let mut opts = opts.clone();
        if opts.max_len.is_none() {
            opts.max_len = self.options.max_len;
            opts.exact_trim = self.options.exact_trim;
        }
        opts
    }
}
