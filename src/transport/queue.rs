//! Queue transport — list-backed, point-to-point.
//!
//! Writes push to the head of a list keyed by topic; reads blocking-pop from
//! the tail, so delivery is FIFO and each message reaches exactly one
//! consumer (competing consumers).

use std::sync::Arc;
use std::time::Duration;

use super::{Delivery, Outgoing, PublishOptions, ReaderOptions, Transport, TransportKind, TransportReader};
use crate::error::BusError;
use crate::store::StoreClient;

pub struct QueueTransport {
    store: Arc<dyn StoreClient>,
}

impl QueueTransport {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }
}

impl Transport for QueueTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Queue
    }

    fn send(
        &self,
        topic: &str,
        outgoing: Outgoing,
        _opts: &PublishOptions,
    ) -> Result<Option<String>, BusError> {
        match outgoing {
            Outgoing::Raw(payload) => {
                self.store.list_push(topic, &payload)?;
                Ok(None)
            }
            Outgoing::Fields(_) => Err(BusError::UnsupportedPayload(
                "field map on the queue transport",
            )),
        }
    }

    fn open_reader(
        &self,
        topics: &[String],
        _opts: ReaderOptions,
    ) -> Result<Box<dyn TransportReader>, BusError> {
        Ok(Box::new(QueueReader {
            store: Arc::clone(&self.store),
            topics: topics.to_vec(),
        }))
    }
}

struct QueueReader {
    store: Arc<dyn StoreClient>,
    topics: Vec<String>,
}

impl TransportReader for QueueReader {
    fn read(&mut self, block: Duration) -> Result<Vec<Delivery>, BusError> {
        match self.store.list_bpop(&self.topics, block)? {
            Some((topic, payload)) => Ok(vec![Delivery::Raw { topic, payload }]),
            None => Ok(Vec::new()),
        }
    }
}
