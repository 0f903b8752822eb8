//! Store client abstraction.
//!
//! The bus never talks to a remote store directly; every transport issues
//! its primitive commands through [`StoreClient`]. Implementations might
//! wrap a networked key-value store's list, log, and channel commands; the
//! bundled [`MemoryStore`] keeps everything in process for tests and
//! single-process deployments.

mod memory;

pub use memory::MemoryStore;

use std::fmt;
use std::time::Duration;

use crate::codec::FieldMap;

/// Error type for store operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The connection to the store failed.
    Connection(String),
    /// A command argument was rejected.
    InvalidArgument(String),
    /// The keyed structure does not exist.
    NoSuchKey(String),
    /// The consumer group already exists on this key.
    GroupExists { key: String, group: String },
    /// The consumer group does not exist on this key.
    NoSuchGroup { key: String, group: String },
    /// An explicit entry id collides with an existing entry.
    DuplicateId { key: String, id: String },
    /// A store lock was poisoned by a panicking thread.
    LockPoisoned(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "connection failed: {}", msg),
            StoreError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            StoreError::NoSuchKey(key) => write!(f, "no such key: {}", key),
            StoreError::GroupExists { key, group } => {
                write!(f, "group {} already exists on {}", group, key)
            }
            StoreError::NoSuchGroup { key, group } => {
                write!(f, "no group {} on {}", group, key)
            }
            StoreError::DuplicateId { key, id } => {
                write!(f, "duplicate entry id {} on {}", id, key)
            }
            StoreError::LockPoisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// One log entry: its id and the flat fields it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: FieldMap,
}

/// A log entry tagged with the topic a multi-topic read returned it for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessage {
    pub topic: String,
    pub id: String,
    pub fields: FieldMap,
}

/// Summary of one undelivered-but-unacknowledged entry in a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub member: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

/// How to bound a log when trimming.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrimStrategy {
    /// Keep at most `limit` newest entries. `exact` requests a strict bound;
    /// a store may trim lazily otherwise.
    MaxLen { limit: u64, exact: bool },
    /// Drop every entry older than `id`.
    MinId { id: String },
}

/// Options for one log append.
#[derive(Clone, Debug, Default)]
pub struct StreamAddOptions {
    /// Explicit entry id; the store assigns one when absent.
    pub id: Option<String>,
    /// Create the log when it does not exist yet.
    pub auto_create: bool,
    /// Trim to at most this many entries after appending.
    pub max_len: Option<u64>,
    /// Whether the max-length bound is strict.
    pub exact_trim: bool,
    /// Drop entries older than this id after appending.
    pub min_id: Option<String>,
}

/// Primitive commands the transports need from a remote key-value store.
///
/// Implementations must be safe for concurrent use; producers and consumers
/// share one client across threads. Blocking reads take a timeout where
/// zero means "wait indefinitely".
pub trait StoreClient: Send + Sync {
    // List (queue semantics): writes push to the head, reads pop the tail.
    fn list_push(&self, key: &str, payload: &[u8]) -> Result<(), StoreError>;
    fn list_bpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>, StoreError>;
    fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    // Log (stream semantics).
    fn stream_add(
        &self,
        key: &str,
        fields: &FieldMap,
        opts: &StreamAddOptions,
    ) -> Result<String, StoreError>;
    /// Read entries after each `(key, cursor)` pair. Cursors are `$` for
    /// "only entries newer than this call", a literal entry id, or a
    /// millisecond timestamp string.
    fn stream_read(
        &self,
        cursors: &[(String, String)],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StoreError>;
    /// Group-scoped read. The cursor `>` means "next undelivered entry for
    /// this group"; any other cursor replays this member's pending entries.
    /// With `no_ack` the read acknowledges on receipt and tracks nothing.
    #[allow(clippy::too_many_arguments)]
    fn stream_read_group(
        &self,
        group: &str,
        member: &str,
        cursors: &[(String, String)],
        count: usize,
        block: Duration,
        no_ack: bool,
    ) -> Result<Vec<StreamMessage>, StoreError>;
    fn stream_ack(&self, key: &str, group: &str, ids: &[String]) -> Result<u64, StoreError>;
    fn stream_trim(&self, key: &str, strategy: &TrimStrategy) -> Result<u64, StoreError>;
    fn stream_delete(&self, key: &str, ids: &[String]) -> Result<u64, StoreError>;
    /// Inclusive range scan; `-` and `+` are the open bounds, `count` of
    /// zero means unlimited.
    fn stream_range(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError>;
    fn stream_len(&self, key: &str) -> Result<u64, StoreError>;
    /// Id of the newest entry ever appended to the log (`0-0` when none),
    /// usable as a read cursor meaning "everything after now".
    fn stream_last_id(&self, key: &str) -> Result<String, StoreError>;
    fn group_create(
        &self,
        key: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<(), StoreError>;
    fn group_destroy(&self, key: &str, group: &str) -> Result<bool, StoreError>;
    fn group_set_id(&self, key: &str, group: &str, id: &str) -> Result<(), StoreError>;
    fn stream_pending(
        &self,
        key: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError>;
    /// Move ownership of pending entries idle for at least `min_idle` to
    /// `member`, returning the claimed entries.
    fn stream_claim(
        &self,
        key: &str,
        group: &str,
        member: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, StoreError>;

    // Channel (publish/subscribe semantics): no persistence, no acks.
    /// Returns the number of subscribers the payload reached.
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<u64, StoreError>;
    fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, StoreError>;
}

/// A live channel subscription. Dropping it unsubscribes.
pub trait Subscription: Send {
    /// Next `(channel, payload)` delivery, or `None` once `timeout` passes
    /// with nothing arriving. A zero timeout waits indefinitely.
    fn next(&mut self, timeout: Duration) -> Result<Option<(String, Vec<u8>)>, StoreError>;
}

/// Key-lifecycle policy collaborator.
///
/// Lifecycle management itself lives outside the bus; implementations might
/// issue expiry commands against the store or schedule refreshes elsewhere.
/// The stream transport only ever calls through this trait.
pub trait TtlPolicy: Send + Sync {
    /// Upper bound a key may live regardless of refreshes.
    fn max_ttl(&self) -> Duration;
    /// Push the key's expiry out once, on demand.
    fn refresh_ttl(&self, key: &str) -> Result<(), StoreError>;
    /// Hand the key to the policy's recurring refresh schedule.
    fn auto_refresh(&self, key: &str) -> Result<(), StoreError>;
}
