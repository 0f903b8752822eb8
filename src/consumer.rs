//! Consumer — handler registration plus the listener loop lifecycle.
//!
//! A consumer owns its handler registry and at most one background listener
//! thread. The loop issues one blocking transport read per iteration, parses
//! each returned record into an [`Event`], and dispatches it through the
//! registry; a stop signal is polled once per iteration, so shutdown latency
//! is bounded by the configured block timeout. For the stream transport the
//! loop also acknowledges entries according to the bound ack mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::codec::Protocol;
use crate::error::BusError;
use crate::event::EventParser;
use crate::registry::{HandlerRegistry, HandlerResult};
use crate::transport::{
    AckMode, Delivery, GroupBinding, ReaderOptions, Transport, TransportReader,
};
use crate::Event;

/// Consumer configuration.
#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    /// Serialization protocol expected on the wire.
    pub protocol: Protocol,
    /// How long one transport read blocks. Zero blocks indefinitely, which
    /// also makes `stop_listening` wait for the next delivery.
    pub block: Duration,
    /// Records per read call on the stream transport (zero = store default).
    pub count: usize,
    /// Consumer-group membership for the stream transport.
    pub group: Option<GroupBinding>,
    /// Start position for stream topics without an explicit one.
    pub default_start: Option<String>,
    /// Run each handler on its own thread instead of in registration order.
    pub parallel_dispatch: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            block: Duration::from_millis(100),
            count: 10,
            group: None,
            default_start: None,
            parallel_dispatch: false,
        }
    }
}

impl ConsumerOptions {
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_group(mut self, binding: GroupBinding) -> Self {
        self.group = Some(binding);
        self
    }

    pub fn with_default_start(mut self, start: impl Into<String>) -> Self {
        self.default_start = Some(start.into());
        self
    }

    pub fn with_parallel_dispatch(mut self) -> Self {
        self.parallel_dispatch = true;
        self
    }
}

/// Options for one `listen` call.
#[derive(Clone, Debug, Default)]
pub struct ListenOptions {
    /// Override the configured block duration.
    pub block: Option<Duration>,
    /// Override the configured per-read record count.
    pub count: Option<usize>,
    /// Explicit per-topic start positions (stream only).
    pub starts: HashMap<String, String>,
}

impl ListenOptions {
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_start(mut self, topic: impl Into<String>, position: impl Into<String>) -> Self {
        self.starts.insert(topic.into(), position.into());
        self
    }
}

struct ListenerState {
    stop_tx: Sender<()>,
    handle: JoinHandle<Result<(), BusError>>,
    running: Arc<AtomicBool>,
}

/// Consumes one transport, dispatching received events to registered
/// handlers.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use kvbus::store::MemoryStore;
/// use kvbus::transport::QueueTransport;
/// use kvbus::{Consumer, ConsumerOptions, ListenOptions};
///
/// let store = Arc::new(MemoryStore::new());
/// let consumer = Consumer::new(
///     Arc::new(QueueTransport::new(store)),
///     ConsumerOptions::default().with_block(Duration::from_millis(10)),
/// );
/// consumer.register("jobs", |event| {
///     println!("got {:?}", event.payload);
///     Ok(())
/// });
/// consumer.listen("jobs", ListenOptions::default()).unwrap();
/// consumer.stop_listening().unwrap();
/// ```
pub struct Consumer<T: Transport> {
    transport: Arc<T>,
    registry: Arc<HandlerRegistry>,
    options: ConsumerOptions,
    listener: Mutex<Option<ListenerState>>,
}

impl<T: Transport> Consumer<T> {
    pub fn new(transport: Arc<T>, options: ConsumerOptions) -> Self {
        Self {
            transport,
            registry: Arc::new(HandlerRegistry::new()),
            options,
            listener: Mutex::new(None),
        }
    }

    /// Register a handler for `topic` (`*` for every topic).
    pub fn register<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(topic, handler);
    }

    /// Remove `topic`'s handlers; an empty topic removes every non-wildcard
    /// entry.
    pub fn unregister(&self, topic: &str) {
        self.registry.unregister(topic);
    }

    /// The registry itself, for sharing with code that registers handlers
    /// elsewhere.
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Whether a listener loop is currently running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .map(|slot| {
                slot.as_ref()
                    .map_or(false, |s| s.running.load(Ordering::SeqCst))
            })
            .unwrap_or(false)
    }

    /// Start the background listener loop over a comma-delimited topic list.
    ///
    /// Fails immediately when a loop is already running. The loop keeps
    /// going until [`Consumer::stop_listening`] or a fatal transport error;
    /// parse failures and handler errors are logged and skipped.
    pub fn listen(&self, topics: &str, opts: ListenOptions) -> Result<(), BusError> {
        let mut slot = self
            .listener
            .lock()
            .map_err(|_| BusError::LockPoisoned("listener state"))?;

        if let Some(state) = slot.take() {
            if state.running.load(Ordering::SeqCst) {
                *slot = Some(state);
                return Err(BusError::AlreadyListening);
            }
            // The previous loop died on its own; surface its result in the
            // log and make room for the new one.
            if let Ok(Err(e)) = state.handle.join() {
                error!(error = %e, "previous listener loop had failed");
            }
        }

        let topic_list: Vec<String> = topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if topic_list.is_empty() {
            return Err(BusError::EmptyTopicList);
        }

        let reader = self.transport.open_reader(
            &topic_list,
            ReaderOptions {
                count: opts.count.unwrap_or(self.options.count),
                starts: opts.starts.clone(),
                default_start: self.options.default_start.clone(),
                group: self.options.group.clone(),
            },
        )?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = Arc::clone(&running);
        let registry = Arc::clone(&self.registry);
        let parser = EventParser::new(self.options.protocol);
        let block = opts.block.unwrap_or(self.options.block);
        let parallel = self.options.parallel_dispatch;

        let handle = thread::spawn(move || {
            let result = listener_loop(reader, stop_rx, registry, parser, block, parallel);
            loop_running.store(false, Ordering::SeqCst);
            result
        });

        *slot = Some(ListenerState {
            stop_tx,
            handle,
            running,
        });
        Ok(())
    }

    /// Signal the listener loop to stop and wait for it to exit, returning
    /// its terminal result: `Ok` after a clean stop, the transport error if
    /// the loop had already died of one.
    ///
    /// The stop signal is observed at the top of the next iteration; a read
    /// already in flight is not interrupted.
    pub fn stop_listening(&self) -> Result<(), BusError> {
        let state = {
            let mut slot = self
                .listener
                .lock()
                .map_err(|_| BusError::LockPoisoned("listener state"))?;
            slot.take().ok_or(BusError::NotListening)?
        };
        let _ = state.stop_tx.send(());
        state.handle.join().unwrap_or(Err(BusError::ListenerPanicked))
    }
}

impl<T: Transport> Drop for Consumer<T> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(state) = slot.take() {
                let _ = state.stop_tx.send(());
                // Don't join on drop - let the thread wind down naturally.
            }
        }
    }
}

fn listener_loop(
    mut reader: Box<dyn TransportReader>,
    stop_rx: Receiver<()>,
    registry: Arc<HandlerRegistry>,
    parser: EventParser,
    block: Duration,
    parallel: bool,
) -> Result<(), BusError> {
    let ack_after_dispatch = reader.ack_mode() == AckMode::OnCompletion;
    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                debug!("listener loop stopped");
                return Ok(());
            }
            Err(TryRecvError::Empty) => {}
        }

        let deliveries = match reader.read(block) {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(error = %e, "listener loop terminated by transport error");
                return Err(e);
            }
        };

        for delivery in deliveries {
            match delivery {
                Delivery::Raw { topic, payload } => match parser.parse_raw(&topic, &payload) {
                    Ok(event) => registry.dispatch(&event, parallel),
                    Err(e) => warn!(topic = %topic, error = %e, "dropping unparsable message"),
                },
                Delivery::Entry { topic, id, fields } => {
                    match parser.parse_entry(&topic, &id, fields) {
                        Ok(event) => {
                            registry.dispatch(&event, parallel);
                            if ack_after_dispatch {
                                if let Err(e) = reader.acknowledge(&topic, &id) {
                                    warn!(topic = %topic, id = %id, error = %e, "acknowledge failed");
                                }
                            }
                        }
                        Err(e) => warn!(topic = %topic, id = %id, error = %e, "dropping unparsable entry"),
                    }
                }
            }
        }
    }
}
