//! In-memory store for tests and single-process deployments.
//!
//! Implements every [`StoreClient`] primitive against process-local state:
//! lists, logs with consumer-group bookkeeping, and channels. Thread-safe
//! and cheap to clone; clones share the same storage. Blocking reads poll
//! with a short sleep until data arrives or the timeout expires.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::{
    PendingEntry, StoreClient, StoreError, StreamAddOptions, StreamEntry, StreamMessage,
    Subscription, TrimStrategy,
};
use crate::codec::FieldMap;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

type ChannelQueue = Arc<Mutex<VecDeque<(String, Vec<u8>)>>>;

/// Process-local [`StoreClient`] implementation.
///
/// ## Example
///
/// ```
/// use kvbus::store::{MemoryStore, StoreClient};
/// use std::time::Duration;
///
/// let store = MemoryStore::new();
/// store.list_push("jobs", b"first").unwrap();
/// let (key, payload) = store
///     .list_bpop(&["jobs".to_string()], Duration::from_millis(10))
///     .unwrap()
///     .unwrap();
/// assert_eq!(key, "jobs");
/// assert_eq!(payload, b"first");
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    streams: HashMap<String, Stream>,
    channels: HashMap<String, Vec<Weak<Mutex<VecDeque<(String, Vec<u8>)>>>>>,
}

#[derive(Default)]
struct Stream {
    entries: Vec<Entry>,
    groups: HashMap<String, Group>,
    /// Order key of the newest entry ever appended; survives trims so
    /// explicit ids stay monotonic.
    last_key: (u64, u64),
}

struct Entry {
    id: String,
    key: (u64, u64),
    fields: FieldMap,
}

struct Group {
    last_delivered: (u64, u64),
    pending: HashMap<String, Pending>,
}

struct Pending {
    member: String,
    delivered_at: Instant,
    delivery_count: u64,
    key: (u64, u64),
}

/// Parse an entry id or millisecond-timestamp cursor into an order key.
fn parse_id(id: &str) -> Option<(u64, u64)> {
    match id.split_once('-') {
        Some((ms, seq)) => Some((ms.parse().ok()?, seq.parse().ok()?)),
        None => id.parse().ok().map(|ms| (ms, 0)),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn deadline_for(block: Duration) -> Option<Instant> {
    if block.is_zero() {
        None
    } else {
        Some(Instant::now() + block)
    }
}

fn expired(deadline: &Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}

fn per_topic_limit(count: usize) -> usize {
    if count == 0 {
        usize::MAX
    } else {
        count
    }
}

impl Stream {
    /// Resolve a read cursor to the key entries must exceed.
    fn resolve_after(&self, cursor: &str) -> Result<(u64, u64), StoreError> {
        if cursor == "$" {
            return Ok(self.last_key);
        }
        self.resolve_marker(cursor)
    }

    /// Resolve an id or timestamp marker to an order key.
    fn resolve_marker(&self, marker: &str) -> Result<(u64, u64), StoreError> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == marker) {
            return Ok(entry.key);
        }
        parse_id(marker)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unresolvable id: {}", marker)))
    }

    fn next_arrival_key(&self) -> (u64, u64) {
        let now = unix_millis();
        if now > self.last_key.0 {
            (now, 0)
        } else {
            (self.last_key.0, self.last_key.1 + 1)
        }
    }

    fn remove_oldest(&mut self, excess: usize) -> u64 {
        let removed: Vec<String> = self.entries.drain(..excess).map(|e| e.id).collect();
        for group in self.groups.values_mut() {
            for id in &removed {
                group.pending.remove(id);
            }
        }
        removed.len() as u64
    }

    fn trim(&mut self, strategy: &TrimStrategy) -> Result<u64, StoreError> {
        match strategy {
            TrimStrategy::MaxLen { limit, .. } => {
                let excess = self.entries.len().saturating_sub(*limit as usize);
                Ok(self.remove_oldest(excess))
            }
            TrimStrategy::MinId { id } => {
                let bound = self.resolve_marker(id)?;
                let excess = self.entries.iter().take_while(|e| e.key < bound).count();
                Ok(self.remove_oldest(excess))
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory store"))
    }
}

impl StoreClient for MemoryStore {
    fn list_push(&self, key: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(payload.to_vec());
        Ok(())
    }

    fn list_bpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let deadline = deadline_for(timeout);
        loop {
            {
                let mut inner = self.lock()?;
                for key in keys {
                    if let Some(payload) = inner.lists.get_mut(key).and_then(VecDeque::pop_back) {
                        return Ok(Some((key.clone(), payload)));
                    }
                }
            }
            if expired(&deadline) {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len) as u64)
    }

    fn stream_add(
        &self,
        key: &str,
        fields: &FieldMap,
        opts: &StreamAddOptions,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock()?;
        if !inner.streams.contains_key(key) && !opts.auto_create {
            return Err(StoreError::NoSuchKey(key.to_string()));
        }
        let stream = inner.streams.entry(key.to_string()).or_default();

        let (id, entry_key) = match &opts.id {
            Some(id) => {
                if stream.entries.iter().any(|e| e.id == *id) {
                    return Err(StoreError::DuplicateId {
                        key: key.to_string(),
                        id: id.clone(),
                    });
                }
                match parse_id(id) {
                    Some(k) if k > stream.last_key => (id.clone(), k),
                    // Opaque ids order by arrival.
                    None => (id.clone(), stream.next_arrival_key()),
                    Some(_) => {
                        return Err(StoreError::InvalidArgument(format!(
                            "id {} is not greater than the last entry",
                            id
                        )))
                    }
                }
            }
            None => {
                let k = stream.next_arrival_key();
                (format!("{}-{}", k.0, k.1), k)
            }
        };

        stream.last_key = entry_key;
        stream.entries.push(Entry {
            id: id.clone(),
            key: entry_key,
            fields: fields.clone(),
        });

        if let Some(limit) = opts.max_len {
            stream.trim(&TrimStrategy::MaxLen {
                limit,
                exact: opts.exact_trim,
            })?;
        }
        if let Some(min_id) = &opts.min_id {
            stream.trim(&TrimStrategy::MinId { id: min_id.clone() })?;
        }
        Ok(id)
    }

    fn stream_read(
        &self,
        cursors: &[(String, String)],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StoreError> {
        let limit = per_topic_limit(count);

        // Cursors resolve once, against the state at call time; `$` must not
        // chase the tail while blocking.
        let mut resolved: Vec<(String, (u64, u64))> = Vec::with_capacity(cursors.len());
        {
            let inner = self.lock()?;
            for (key, cursor) in cursors {
                let after = match inner.streams.get(key) {
                    Some(stream) => stream.resolve_after(cursor)?,
                    None if cursor == "$" => (0, 0),
                    None => parse_id(cursor).ok_or_else(|| {
                        StoreError::InvalidArgument(format!("unresolvable id: {}", cursor))
                    })?,
                };
                resolved.push((key.clone(), after));
            }
        }

        let deadline = deadline_for(block);
        loop {
            {
                let inner = self.lock()?;
                let mut out = Vec::new();
                for (key, after) in &resolved {
                    if let Some(stream) = inner.streams.get(key) {
                        for entry in stream.entries.iter().filter(|e| e.key > *after).take(limit) {
                            out.push(StreamMessage {
                                topic: key.clone(),
                                id: entry.id.clone(),
                                fields: entry.fields.clone(),
                            });
                        }
                    }
                }
                if !out.is_empty() {
                    return Ok(out);
                }
            }
            if expired(&deadline) {
                return Ok(Vec::new());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn stream_read_group(
        &self,
        group: &str,
        member: &str,
        cursors: &[(String, String)],
        count: usize,
        block: Duration,
        no_ack: bool,
    ) -> Result<Vec<StreamMessage>, StoreError> {
        let limit = per_topic_limit(count);
        let wants_new = cursors.iter().any(|(_, cursor)| cursor == ">");
        let deadline = deadline_for(block);

        loop {
            {
                let mut inner = self.lock()?;
                let mut out = Vec::new();
                for (key, cursor) in cursors {
                    let stream = inner.streams.get_mut(key).ok_or_else(|| {
                        StoreError::NoSuchGroup {
                            key: key.clone(),
                            group: group.to_string(),
                        }
                    })?;
                    let Stream {
                        entries, groups, ..
                    } = stream;
                    let state = groups.get_mut(group).ok_or_else(|| StoreError::NoSuchGroup {
                        key: key.clone(),
                        group: group.to_string(),
                    })?;

                    if cursor == ">" {
                        let start = state.last_delivered;
                        let picked: Vec<usize> = entries
                            .iter()
                            .enumerate()
                            .filter(|(_, e)| e.key > start)
                            .map(|(i, _)| i)
                            .take(limit)
                            .collect();
                        for i in picked {
                            let entry = &entries[i];
                            state.last_delivered = entry.key;
                            if !no_ack {
                                state.pending.insert(
                                    entry.id.clone(),
                                    Pending {
                                        member: member.to_string(),
                                        delivered_at: Instant::now(),
                                        delivery_count: 1,
                                        key: entry.key,
                                    },
                                );
                            }
                            out.push(StreamMessage {
                                topic: key.clone(),
                                id: entry.id.clone(),
                                fields: entry.fields.clone(),
                            });
                        }
                    } else {
                        // History replay: this member's pending entries past
                        // the cursor. Never blocks.
                        let after = if let Some(entry) =
                            entries.iter().find(|e| e.id == *cursor)
                        {
                            entry.key
                        } else {
                            parse_id(cursor).ok_or_else(|| {
                                StoreError::InvalidArgument(format!(
                                    "unresolvable id: {}",
                                    cursor
                                ))
                            })?
                        };
                        let owned = entries
                            .iter()
                            .filter(|e| e.key > after)
                            .filter(|e| {
                                state
                                    .pending
                                    .get(&e.id)
                                    .map_or(false, |p| p.member == member)
                            })
                            .take(limit);
                        for entry in owned {
                            out.push(StreamMessage {
                                topic: key.clone(),
                                id: entry.id.clone(),
                                fields: entry.fields.clone(),
                            });
                        }
                    }
                }
                if !out.is_empty() {
                    return Ok(out);
                }
            }
            if !wants_new || expired(&deadline) {
                return Ok(Vec::new());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn stream_ack(&self, key: &str, group: &str, ids: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let stream = inner
            .streams
            .get_mut(key)
            .ok_or_else(|| StoreError::NoSuchKey(key.to_string()))?;
        let state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::NoSuchGroup {
                key: key.to_string(),
                group: group.to_string(),
            })?;
        let mut acked = 0;
        for id in ids {
            if state.pending.remove(id).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    fn stream_trim(&self, key: &str, strategy: &TrimStrategy) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        match inner.streams.get_mut(key) {
            Some(stream) => stream.trim(strategy),
            None => Ok(0),
        }
    }

    fn stream_delete(&self, key: &str, ids: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let stream = match inner.streams.get_mut(key) {
            Some(stream) => stream,
            None => return Ok(0),
        };
        let before = stream.entries.len();
        stream.entries.retain(|e| !ids.contains(&e.id));
        let removed = before - stream.entries.len();
        for group in stream.groups.values_mut() {
            for id in ids {
                group.pending.remove(id);
            }
        }
        Ok(removed as u64)
    }

    fn stream_range(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let limit = per_topic_limit(count);
        let inner = self.lock()?;
        let stream = match inner.streams.get(key) {
            Some(stream) => stream,
            None => return Ok(Vec::new()),
        };
        let from = if start == "-" {
            (0, 0)
        } else {
            stream.resolve_marker(start)?
        };
        let to = if end == "+" {
            (u64::MAX, u64::MAX)
        } else {
            stream.resolve_marker(end)?
        };
        Ok(stream
            .entries
            .iter()
            .filter(|e| e.key >= from && e.key <= to)
            .take(limit)
            .map(|e| StreamEntry {
                id: e.id.clone(),
                fields: e.fields.clone(),
            })
            .collect())
    }

    fn stream_len(&self, key: &str) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        Ok(inner.streams.get(key).map_or(0, |s| s.entries.len()) as u64)
    }

    fn stream_last_id(&self, key: &str) -> Result<String, StoreError> {
        let inner = self.lock()?;
        let key = inner.streams.get(key).map_or((0, 0), |s| s.last_key);
        Ok(format!("{}-{}", key.0, key.1))
    }

    fn group_create(
        &self,
        key: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.streams.contains_key(key) && !create_stream {
            return Err(StoreError::NoSuchKey(key.to_string()));
        }
        let stream = inner.streams.entry(key.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Err(StoreError::GroupExists {
                key: key.to_string(),
                group: group.to_string(),
            });
        }
        let last_delivered = if start == "$" {
            stream.last_key
        } else {
            stream.resolve_marker(start)?
        };
        stream.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: HashMap::new(),
            },
        );
        Ok(())
    }

    fn group_destroy(&self, key: &str, group: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner
            .streams
            .get_mut(key)
            .map_or(false, |s| s.groups.remove(group).is_some()))
    }

    fn group_set_id(&self, key: &str, group: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stream = inner
            .streams
            .get_mut(key)
            .ok_or_else(|| StoreError::NoSuchKey(key.to_string()))?;
        let last_delivered = if id == "$" {
            stream.last_key
        } else {
            stream.resolve_marker(id)?
        };
        let state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::NoSuchGroup {
                key: key.to_string(),
                group: group.to_string(),
            })?;
        state.last_delivered = last_delivered;
        Ok(())
    }

    fn stream_pending(
        &self,
        key: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        let limit = per_topic_limit(count);
        let inner = self.lock()?;
        let stream = inner
            .streams
            .get(key)
            .ok_or_else(|| StoreError::NoSuchKey(key.to_string()))?;
        let state = stream
            .groups
            .get(group)
            .ok_or_else(|| StoreError::NoSuchGroup {
                key: key.to_string(),
                group: group.to_string(),
            })?;
        let mut pending: Vec<(&String, &Pending)> = state.pending.iter().collect();
        pending.sort_by_key(|(_, p)| p.key);
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(id, p)| PendingEntry {
                id: id.clone(),
                member: p.member.clone(),
                idle: p.delivered_at.elapsed(),
                delivery_count: p.delivery_count,
            })
            .collect())
    }

    fn stream_claim(
        &self,
        key: &str,
        group: &str,
        member: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut inner = self.lock()?;
        let stream = inner
            .streams
            .get_mut(key)
            .ok_or_else(|| StoreError::NoSuchKey(key.to_string()))?;
        let Stream {
            entries, groups, ..
        } = stream;
        let state = groups.get_mut(group).ok_or_else(|| StoreError::NoSuchGroup {
            key: key.to_string(),
            group: group.to_string(),
        })?;
        let mut claimed = Vec::new();
        for id in ids {
            let pending = match state.pending.get_mut(id) {
                Some(p) if p.delivered_at.elapsed() >= min_idle => p,
                _ => continue,
            };
            match entries.iter().find(|e| e.id == *id) {
                Some(entry) => {
                    pending.member = member.to_string();
                    pending.delivered_at = Instant::now();
                    pending.delivery_count += 1;
                    claimed.push(StreamEntry {
                        id: entry.id.clone(),
                        fields: entry.fields.clone(),
                    });
                }
                // The entry was trimmed away; drop the dangling claim.
                None => {
                    state.pending.remove(id);
                }
            }
        }
        Ok(claimed)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let subscribers = match inner.channels.get_mut(channel) {
            Some(subscribers) => subscribers,
            None => return Ok(0),
        };
        subscribers.retain(|w| w.strong_count() > 0);
        let mut delivered = 0;
        for weak in subscribers.iter() {
            if let Some(queue) = weak.upgrade() {
                queue
                    .lock()
                    .map_err(|_| StoreError::LockPoisoned("subscription queue"))?
                    .push_back((channel.to_string(), payload.to_vec()));
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, StoreError> {
        let queue: ChannelQueue = Arc::new(Mutex::new(VecDeque::new()));
        let mut inner = self.lock()?;
        for channel in channels {
            inner
                .channels
                .entry(channel.clone())
                .or_default()
                .push(Arc::downgrade(&queue));
        }
        Ok(Box::new(MemorySubscription { queue }))
    }
}

struct MemorySubscription {
    queue: ChannelQueue,
}

impl Subscription for MemorySubscription {
    fn next(&mut self, timeout: Duration) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let deadline = deadline_for(timeout);
        loop {
            {
                let mut queue = self
                    .queue
                    .lock()
                    .map_err(|_| StoreError::LockPoisoned("subscription queue"))?;
                if let Some(delivery) = queue.pop_front() {
                    return Ok(Some(delivery));
                }
            }
            if expired(&deadline) {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &[u8])]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    fn add_defaults() -> StreamAddOptions {
        StreamAddOptions {
            auto_create: true,
            ..StreamAddOptions::default()
        }
    }

    #[test]
    fn list_is_fifo() {
        let store = MemoryStore::new();
        store.list_push("q", b"1").unwrap();
        store.list_push("q", b"2").unwrap();

        let keys = vec!["q".to_string()];
        let (_, first) = store.list_bpop(&keys, Duration::from_millis(10)).unwrap().unwrap();
        let (_, second) = store.list_bpop(&keys, Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first, b"1");
        assert_eq!(second, b"2");
        assert!(store.list_bpop(&keys, Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn bpop_checks_keys_in_order() {
        let store = MemoryStore::new();
        store.list_push("b", b"from-b").unwrap();
        let keys = vec!["a".to_string(), "b".to_string()];
        let (key, _) = store.list_bpop(&keys, Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(key, "b");
    }

    #[test]
    fn stream_ids_are_monotonic() {
        let store = MemoryStore::new();
        let first = store.stream_add("s", &fields(&[("a", b"1")]), &add_defaults()).unwrap();
        let second = store.stream_add("s", &fields(&[("a", b"2")]), &add_defaults()).unwrap();
        assert!(parse_id(&first).unwrap() < parse_id(&second).unwrap());
    }

    #[test]
    fn explicit_id_must_advance() {
        let store = MemoryStore::new();
        let mut opts = add_defaults();
        opts.id = Some("5-0".to_string());
        store.stream_add("s", &fields(&[("a", b"1")]), &opts).unwrap();

        opts.id = Some("4-0".to_string());
        assert!(matches!(
            store.stream_add("s", &fields(&[("a", b"2")]), &opts),
            Err(StoreError::InvalidArgument(_))
        ));

        opts.id = Some("5-0".to_string());
        assert!(matches!(
            store.stream_add("s", &fields(&[("a", b"3")]), &opts),
            Err(StoreError::DuplicateId { .. })
        ));
    }

    #[test]
    fn add_without_auto_create_requires_stream() {
        let store = MemoryStore::new();
        let opts = StreamAddOptions::default();
        assert!(matches!(
            store.stream_add("missing", &fields(&[("a", b"1")]), &opts),
            Err(StoreError::NoSuchKey(_))
        ));
    }

    #[test]
    fn read_from_zero_returns_everything() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.stream_add("s", &fields(&[("n", b"2")]), &add_defaults()).unwrap();

        let cursors = vec![("s".to_string(), "0".to_string())];
        let messages = store.stream_read(&cursors, 10, Duration::ZERO).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].fields["n"], b"1");
    }

    #[test]
    fn dollar_cursor_skips_existing_entries() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"old")]), &add_defaults()).unwrap();

        let cursors = vec![("s".to_string(), "$".to_string())];
        let messages = store.stream_read(&cursors, 10, Duration::from_millis(5)).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn read_resumes_after_id() {
        let store = MemoryStore::new();
        let first = store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.stream_add("s", &fields(&[("n", b"2")]), &add_defaults()).unwrap();

        let cursors = vec![("s".to_string(), first)];
        let messages = store.stream_read(&cursors, 10, Duration::ZERO).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].fields["n"], b"2");
    }

    #[test]
    fn group_read_tracks_pending_until_ack() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.group_create("s", "g", "0", false).unwrap();

        let cursors = vec![("s".to_string(), ">".to_string())];
        let messages = store
            .stream_read_group("g", "m1", &cursors, 10, Duration::ZERO, false)
            .unwrap();
        assert_eq!(messages.len(), 1);

        let pending = store.stream_pending("s", "g", 0).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].member, "m1");
        assert_eq!(pending[0].delivery_count, 1);

        let acked = store.stream_ack("s", "g", &[messages[0].id.clone()]).unwrap();
        assert_eq!(acked, 1);
        assert!(store.stream_pending("s", "g", 0).unwrap().is_empty());
    }

    #[test]
    fn no_ack_read_leaves_nothing_pending() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.group_create("s", "g", "0", false).unwrap();

        let cursors = vec![("s".to_string(), ">".to_string())];
        let messages = store
            .stream_read_group("g", "m1", &cursors, 10, Duration::ZERO, true)
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(store.stream_pending("s", "g", 0).unwrap().is_empty());
    }

    #[test]
    fn group_members_split_entries() {
        let store = MemoryStore::new();
        for n in 0..4u8 {
            store
                .stream_add("s", &fields(&[("n", &[n])]), &add_defaults())
                .unwrap();
        }
        store.group_create("s", "g", "0", false).unwrap();

        let cursors = vec![("s".to_string(), ">".to_string())];
        let first = store
            .stream_read_group("g", "m1", &cursors, 2, Duration::ZERO, false)
            .unwrap();
        let second = store
            .stream_read_group("g", "m2", &cursors, 10, Duration::ZERO, false)
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        let mut ids: Vec<&String> = first.iter().chain(second.iter()).map(|m| &m.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn history_read_replays_own_pending_only() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.stream_add("s", &fields(&[("n", b"2")]), &add_defaults()).unwrap();
        store.group_create("s", "g", "0", false).unwrap();

        let new = vec![("s".to_string(), ">".to_string())];
        store.stream_read_group("g", "m1", &new, 1, Duration::ZERO, false).unwrap();
        store.stream_read_group("g", "m2", &new, 1, Duration::ZERO, false).unwrap();

        let history = vec![("s".to_string(), "0".to_string())];
        let replayed = store
            .stream_read_group("g", "m1", &history, 10, Duration::ZERO, false)
            .unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].fields["n"], b"1");
    }

    #[test]
    fn claim_moves_idle_entries() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.group_create("s", "g", "0", false).unwrap();

        let cursors = vec![("s".to_string(), ">".to_string())];
        let messages = store
            .stream_read_group("g", "m1", &cursors, 10, Duration::ZERO, false)
            .unwrap();
        let id = messages[0].id.clone();

        // Too recent for a min-idle claim.
        let claimed = store
            .stream_claim("s", "g", "m2", Duration::from_secs(60), &[id.clone()])
            .unwrap();
        assert!(claimed.is_empty());

        let claimed = store
            .stream_claim("s", "g", "m2", Duration::ZERO, &[id.clone()])
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = store.stream_pending("s", "g", 0).unwrap();
        assert_eq!(pending[0].member, "m2");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[test]
    fn trim_max_len_drops_oldest() {
        let store = MemoryStore::new();
        for n in 0..5u8 {
            store
                .stream_add("s", &fields(&[("n", &[n])]), &add_defaults())
                .unwrap();
        }
        let removed = store
            .stream_trim("s", &TrimStrategy::MaxLen { limit: 2, exact: true })
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.stream_len("s").unwrap(), 2);

        let entries = store.stream_range("s", "-", "+", 0).unwrap();
        assert_eq!(entries[0].fields["n"], vec![3u8]);
    }

    #[test]
    fn max_len_applies_on_add() {
        let store = MemoryStore::new();
        let mut opts = add_defaults();
        opts.max_len = Some(2);
        for n in 0..4u8 {
            store.stream_add("s", &fields(&[("n", &[n])]), &opts).unwrap();
        }
        assert_eq!(store.stream_len("s").unwrap(), 2);
    }

    #[test]
    fn delete_removes_by_id() {
        let store = MemoryStore::new();
        let id = store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.stream_add("s", &fields(&[("n", b"2")]), &add_defaults()).unwrap();

        assert_eq!(store.stream_delete("s", &[id]).unwrap(), 1);
        assert_eq!(store.stream_len("s").unwrap(), 1);
    }

    #[test]
    fn range_respects_bounds_and_count() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for n in 0..3u8 {
            ids.push(
                store
                    .stream_add("s", &fields(&[("n", &[n])]), &add_defaults())
                    .unwrap(),
            );
        }
        let entries = store.stream_range("s", &ids[1], "+", 0).unwrap();
        assert_eq!(entries.len(), 2);
        let entries = store.stream_range("s", "-", "+", 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, ids[0]);
    }

    #[test]
    fn group_create_is_exclusive() {
        let store = MemoryStore::new();
        store.group_create("s", "g", "$", true).unwrap();
        assert!(matches!(
            store.group_create("s", "g", "$", true),
            Err(StoreError::GroupExists { .. })
        ));
        assert!(store.group_destroy("s", "g").unwrap());
        assert!(!store.group_destroy("s", "g").unwrap());
    }

    #[test]
    fn group_set_id_rewinds_delivery() {
        let store = MemoryStore::new();
        store.stream_add("s", &fields(&[("n", b"1")]), &add_defaults()).unwrap();
        store.group_create("s", "g", "$", false).unwrap();

        let cursors = vec![("s".to_string(), ">".to_string())];
        assert!(store
            .stream_read_group("g", "m", &cursors, 10, Duration::from_millis(5), false)
            .unwrap()
            .is_empty());

        store.group_set_id("s", "g", "0").unwrap();
        let messages = store
            .stream_read_group("g", "m", &cursors, 10, Duration::ZERO, false)
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn publish_reaches_all_live_subscribers() {
        let store = MemoryStore::new();
        let channels = vec!["ch".to_string()];
        let mut sub1 = store.subscribe(&channels).unwrap();
        let mut sub2 = store.subscribe(&channels).unwrap();

        assert_eq!(store.publish("ch", b"hello").unwrap(), 2);
        assert_eq!(
            sub1.next(Duration::from_millis(50)).unwrap().unwrap().1,
            b"hello"
        );
        assert_eq!(
            sub2.next(Duration::from_millis(50)).unwrap().unwrap().1,
            b"hello"
        );

        drop(sub2);
        assert_eq!(store.publish("ch", b"again").unwrap(), 1);
    }

    #[test]
    fn publish_without_subscribers_reaches_nobody() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("empty", b"x").unwrap(), 0);
    }
}
