//! Stream transport — log-backed, at-least-once.
//!
//! Writes append to a per-topic log; reads walk the log behind a per-topic
//! cursor, either plainly or scoped to a consumer group where each entry is
//! delivered to at most one member until acknowledged. On top of the shared
//! transport contract this adapter exposes the log-management superset:
//! trim, delete, range scans, group administration, pending inspection, and
//! claim.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{
    AckMode, Delivery, GroupBinding, Outgoing, PublishOptions, ReaderOptions, Transport,
    TransportKind, TransportReader,
};
use crate::error::BusError;
use crate::store::{
    PendingEntry, StoreClient, StoreError, StreamAddOptions, StreamEntry, TrimStrategy, TtlPolicy,
};

/// Cursor marker for "only entries newer than now".
pub const START_LATEST: &str = "$";
/// Cursor marker for "next entry undelivered to this group".
pub const START_UNDELIVERED: &str = ">";

pub struct StreamTransport {
    store: Arc<dyn StoreClient>,
    ttl: Option<Arc<dyn TtlPolicy>>,
}

impl StreamTransport {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store, ttl: None }
    }

    /// Attach a key-lifecycle policy; the log key is refreshed after every
    /// successful append.
    pub fn with_ttl_policy(mut self, policy: Arc<dyn TtlPolicy>) -> Self {
        self.ttl = Some(policy);
        self
    }

    /// Acknowledge entries on behalf of a group, returning how many were
    /// still pending. This is the manual-ack path for handlers running under
    /// [`AckMode::Manual`].
    pub fn acknowledge(&self, topic: &str, group: &str, ids: &[String]) -> Result<u64, BusError> {
        Ok(self.store.stream_ack(topic, group, ids)?)
    }

    /// Trim a topic's log, returning the number of entries removed.
    pub fn trim(&self, topic: &str, strategy: &TrimStrategy) -> Result<u64, BusError> {
        Ok(self.store.stream_trim(topic, strategy)?)
    }

    /// Delete entries by id, returning how many existed.
    pub fn delete(&self, topic: &str, ids: &[String]) -> Result<u64, BusError> {
        Ok(self.store.stream_delete(topic, ids)?)
    }

    /// Scan entries between two markers, inclusive. `-` and `+` are the open
    /// bounds; a zero count means no limit.
    pub fn range(
        &self,
        topic: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError> {
        Ok(self.store.stream_range(topic, start, end, count)?)
    }

    /// Number of entries currently in a topic's log.
    pub fn len(&self, topic: &str) -> Result<u64, BusError> {
        Ok(self.store.stream_len(topic)?)
    }

    pub fn create_group(
        &self,
        topic: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<(), BusError> {
        Ok(self.store.group_create(topic, group, start, create_stream)?)
    }

    pub fn destroy_group(&self, topic: &str, group: &str) -> Result<bool, BusError> {
        Ok(self.store.group_destroy(topic, group)?)
    }

    pub fn set_group_start(&self, topic: &str, group: &str, id: &str) -> Result<(), BusError> {
        Ok(self.store.group_set_id(topic, group, id)?)
    }

    /// Entries delivered to the group but not yet acknowledged.
    pub fn pending(
        &self,
        topic: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, BusError> {
        Ok(self.store.stream_pending(topic, group, count)?)
    }

    /// Move ownership of pending entries idle for at least `min_idle` to
    /// `member`, returning the claimed entries.
    pub fn claim(
        &self,
        topic: &str,
        group: &str,
        member: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, BusError> {
        Ok(self.store.stream_claim(topic, group, member, min_idle, ids)?)
    }
}

impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn send(
        &self,
        topic: &str,
        outgoing: Outgoing,
        opts: &PublishOptions,
    ) -> Result<Option<String>, BusError> {
        let fields = match outgoing {
            Outgoing::Fields(fields) => fields,
            Outgoing::Raw(_) => {
                return Err(BusError::UnsupportedPayload(
                    "opaque blob on the stream transport",
                ))
            }
        };
        let add = StreamAddOptions {
            id: opts.id.clone(),
            auto_create: opts.auto_create,
            max_len: opts.max_len,
            exact_trim: opts.exact_trim,
            min_id: opts.min_id.clone(),
        };
        let id = self.store.stream_add(topic, &fields, &add)?;
        if let Some(policy) = &self.ttl {
            if let Err(e) = policy.refresh_ttl(topic) {
                warn!(topic, error = %e, "ttl refresh failed after append");
            }
        }
        Ok(Some(id))
    }

    fn open_reader(
        &self,
        topics: &[String],
        opts: ReaderOptions,
    ) -> Result<Box<dyn TransportReader>, BusError> {
        let cursors = if let Some(binding) = &opts.group {
            // Groups come into existence with the consumer, anchored at the
            // supplied start position; a group that is already there is
            // fine. Group reads themselves always ask for the next
            // undelivered entry.
            for topic in topics {
                let start = opts
                    .starts
                    .get(topic)
                    .or(opts.default_start.as_ref())
                    .map(String::as_str)
                    .filter(|s| *s != START_UNDELIVERED)
                    .unwrap_or(START_LATEST);
                match self.store.group_create(topic, &binding.group, start, true) {
                    Ok(()) | Err(StoreError::GroupExists { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            topics
                .iter()
                .map(|topic| (topic.clone(), START_UNDELIVERED.to_string()))
                .collect()
        } else {
            let default_start = opts
                .default_start
                .clone()
                .unwrap_or_else(|| START_LATEST.to_string());
            let mut cursors = Vec::with_capacity(topics.len());
            for topic in topics {
                let mut start = opts
                    .starts
                    .get(topic)
                    .cloned()
                    .unwrap_or_else(|| default_start.clone());
                // Pin "latest" to a concrete position now; re-resolving it on
                // every read would skip entries appended between two reads.
                if start == START_LATEST {
                    start = self.store.stream_last_id(topic)?;
                }
                cursors.push((topic.clone(), start));
            }
            cursors
        };

        Ok(Box::new(StreamReader {
            store: Arc::clone(&self.store),
            group: opts.group,
            count: opts.count,
            cursors,
        }))
    }
}

/// Read side of the stream transport.
///
/// Owned by one listener loop; the cursor table has a single writer by
/// construction.
struct StreamReader {
    store: Arc<dyn StoreClient>,
    group: Option<GroupBinding>,
    count: usize,
    cursors: Vec<(String, String)>,
}

impl TransportReader for StreamReader {
    fn read(&mut self, block: Duration) -> Result<Vec<Delivery>, BusError> {
        let messages = match &self.group {
            None => self.store.stream_read(&self.cursors, self.count, block)?,
            Some(binding) => {
                let no_ack = binding.ack_mode == AckMode::OnReceive;
                self.store.stream_read_group(
                    &binding.group,
                    &binding.member,
                    &self.cursors,
                    self.count,
                    block,
                    no_ack,
                )?
            }
        };

        // Advance every literal cursor to the last id seen for its topic;
        // the `>` cursor is positionless and stays put.
        for message in &messages {
            for (topic, cursor) in &mut self.cursors {
                if *topic == message.topic && cursor.as_str() != START_UNDELIVERED {
                    *cursor = message.id.clone();
                }
            }
        }

        Ok(messages
            .into_iter()
            .map(|m| Delivery::Entry {
                topic: m.topic,
                id: m.id,
                fields: m.fields,
            })
            .collect())
    }

    fn ack_mode(&self) -> AckMode {
        self.group
            .as_ref()
            .map(|b| b.ack_mode)
            .unwrap_or(AckMode::Manual)
    }

    fn acknowledge(&mut self, topic: &str, id: &str) -> Result<(), BusError> {
        if let Some(binding) = &self.group {
            self.store
                .stream_ack(topic, &binding.group, &[id.to_string()])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldMap;
    use crate::store::MemoryStore;

    fn fields(n: u8) -> FieldMap {
        let mut f = FieldMap::new();
        f.insert("n".to_string(), vec![n]);
        f
    }

    fn transport() -> StreamTransport {
        StreamTransport::new(Arc::new(MemoryStore::new()))
    }

    fn reader_opts(start: &str) -> ReaderOptions {
        ReaderOptions {
            default_start: Some(start.to_string()),
            ..ReaderOptions::default()
        }
    }

    #[test]
    fn send_returns_assigned_id() {
        let t = transport();
        let id = t
            .send("s", Outgoing::Fields(fields(1)), &PublishOptions::default())
            .unwrap();
        assert!(id.is_some());
    }

    #[test]
    fn rejects_raw_payloads() {
        let t = transport();
        let result = t.send("s", Outgoing::Raw(b"x".to_vec()), &PublishOptions::default());
        assert!(matches!(result, Err(BusError::UnsupportedPayload(_))));
    }

    #[test]
    fn cursor_advances_between_reads() {
        let t = transport();
        t.send("s", Outgoing::Fields(fields(1)), &PublishOptions::default()).unwrap();

        let mut reader = t.open_reader(&["s".to_string()], reader_opts("0")).unwrap();
        assert_eq!(reader.read(Duration::ZERO).unwrap().len(), 1);
        // Nothing new: the cursor moved past the first entry.
        assert!(reader.read(Duration::from_millis(5)).unwrap().is_empty());

        t.send("s", Outgoing::Fields(fields(2)), &PublishOptions::default()).unwrap();
        assert_eq!(reader.read(Duration::ZERO).unwrap().len(), 1);
    }

    #[test]
    fn group_reader_acks_through_binding() {
        let t = transport();
        t.create_group("s", "g", "0", true).unwrap();
        t.send("s", Outgoing::Fields(fields(1)), &PublishOptions::default()).unwrap();

        let opts = ReaderOptions {
            group: Some(GroupBinding::new("g", "m1", AckMode::OnCompletion)),
            ..ReaderOptions::default()
        };
        let mut reader = t.open_reader(&["s".to_string()], opts).unwrap();
        let deliveries = reader.read(Duration::ZERO).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(reader.ack_mode(), AckMode::OnCompletion);

        let (topic, id) = match &deliveries[0] {
            Delivery::Entry { topic, id, .. } => (topic.clone(), id.clone()),
            other => panic!("unexpected delivery: {:?}", other),
        };
        assert_eq!(t.pending(&topic, "g", 0).unwrap().len(), 1);
        reader.acknowledge(&topic, &id).unwrap();
        assert!(t.pending(&topic, "g", 0).unwrap().is_empty());
    }

    #[test]
    fn on_receive_binding_leaves_nothing_pending() {
        let t = transport();
        t.send("s", Outgoing::Fields(fields(1)), &PublishOptions::default()).unwrap();

        let opts = ReaderOptions {
            group: Some(GroupBinding::new("g", "m1", AckMode::OnReceive)),
            starts: [("s".to_string(), "0".to_string())].into_iter().collect(),
            ..ReaderOptions::default()
        };
        let mut reader = t.open_reader(&["s".to_string()], opts).unwrap();
        assert_eq!(reader.read(Duration::ZERO).unwrap().len(), 1);
        assert!(t.pending("s", "g", 0).unwrap().is_empty());
    }

    #[test]
    fn management_surface_round_trip() {
        let t = transport();
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(
                t.send("s", Outgoing::Fields(fields(n)), &PublishOptions::default())
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(t.len("s").unwrap(), 3);
        assert_eq!(t.range("s", "-", "+", 0).unwrap().len(), 3);
        assert_eq!(t.delete("s", &ids[..1].to_vec()).unwrap(), 1);
        assert_eq!(
            t.trim("s", &TrimStrategy::MaxLen { limit: 1, exact: true }).unwrap(),
            1
        );
        assert_eq!(t.len("s").unwrap(), 1);
    }

    #[test]
    fn ttl_policy_is_refreshed_on_append() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingPolicy(AtomicUsize);
        impl TtlPolicy for CountingPolicy {
            fn max_ttl(&self) -> Duration {
                Duration::from_secs(60)
            }
            fn refresh_ttl(&self, _key: &str) -> Result<(), StoreError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn auto_refresh(&self, _key: &str) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let policy = Arc::new(CountingPolicy(AtomicUsize::new(0)));
        let t = StreamTransport::new(Arc::new(MemoryStore::new()))
            .with_ttl_policy(policy.clone());
        t.send("s", Outgoing::Fields(fields(1)), &PublishOptions::default()).unwrap();
        t.send("s", Outgoing::Fields(fields(2)), &PublishOptions::default()).unwrap();
        assert_eq!(policy.0.load(Ordering::SeqCst), 2);
    }
}
