//! Handler registry — topic to handler-list mapping with wildcard support.
//!
//! Scoped to one consumer instance and guarded by a reader/writer lock, so
//! multiple consumers coexist without interference and registration may
//! happen from any thread while a listener loop dispatches.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread;

use tracing::warn;

use crate::event::Event;

/// Topic key whose handlers run for every event, in addition to (not
/// instead of) the event's own topic handlers.
pub const WILDCARD_TOPIC: &str = "*";

/// What a handler returns. Errors are logged by dispatch and never
/// escalated; a failing handler halts neither its siblings nor the loop.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type HandlerFn = dyn Fn(&Event) -> HandlerResult + Send + Sync;

/// Per-consumer handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<HandlerFn>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to `topic`'s list, creating the list on first use.
    /// Handlers run in registration order under sequential dispatch.
    pub fn register<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Remove `topic`'s handler list. An empty topic removes every
    /// non-wildcard entry; the wildcard bucket only goes away through an
    /// explicit `unregister("*")` or [`HandlerRegistry::clear`].
    pub fn unregister(&self, topic: &str) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if topic.is_empty() {
            handlers.retain(|registered, _| registered == WILDCARD_TOPIC);
        } else {
            handlers.remove(topic);
        }
    }

    /// Remove everything, wildcard bucket included.
    pub fn clear(&self) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.clear();
    }

    /// Number of handlers that would run for `topic`, wildcard included.
    pub fn handler_count(&self, topic: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let direct = handlers.get(topic).map_or(0, Vec::len);
        let wildcard = if topic == WILDCARD_TOPIC {
            0
        } else {
            handlers.get(WILDCARD_TOPIC).map_or(0, Vec::len)
        };
        direct + wildcard
    }

    /// Invoke every handler registered for the event's topic plus every
    /// wildcard handler.
    ///
    /// Sequential dispatch runs handlers in registration order on the
    /// calling thread, logging any error and carrying on. Parallel dispatch
    /// spawns one thread per handler and returns without waiting.
    pub fn dispatch(&self, event: &Event, parallel: bool) {
        let snapshot: Vec<Arc<HandlerFn>> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            let mut snapshot = Vec::new();
            if let Some(list) = handlers.get(&event.topic) {
                snapshot.extend(list.iter().cloned());
            }
            if event.topic != WILDCARD_TOPIC {
                if let Some(list) = handlers.get(WILDCARD_TOPIC) {
                    snapshot.extend(list.iter().cloned());
                }
            }
            snapshot
        };

        for handler in snapshot {
            if parallel {
                let event = event.clone();
                thread::spawn(move || {
                    if let Err(e) = (*handler)(&event) {
                        warn!(topic = %event.topic, error = %e, "handler failed");
                    }
                });
            } else if let Err(e) = (*handler)(event) {
                warn!(topic = %event.topic, error = %e, "handler failed");
            }
        }
    }
}
