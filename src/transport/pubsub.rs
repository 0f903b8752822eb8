//! Pub/sub transport — channel-backed fan-out.
//!
//! Writes publish to a named channel; every live subscriber sees every
//! message. Nothing is persisted and nothing is acknowledged, so a consumer
//! that subscribes late has missed what came before.

use std::sync::Arc;
use std::time::Duration;

use super::{Delivery, Outgoing, PublishOptions, ReaderOptions, Transport, TransportKind, TransportReader};
use crate::error::BusError;
use crate::store::{StoreClient, Subscription};

pub struct PubSubTransport {
    store: Arc<dyn StoreClient>,
}

impl PubSubTransport {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }
}

impl Transport for PubSubTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PubSub
    }

    fn send(
        &self,
        topic: &str,
        outgoing: Outgoing,
        _opts: &PublishOptions,
    ) -> Result<Option<String>, BusError> {
        match outgoing {
            Outgoing::Raw(payload) => {
                self.store.publish(topic, &payload)?;
                Ok(None)
            }
            Outgoing::Fields(_) => Err(BusError::UnsupportedPayload(
                "field map on the pub/sub transport",
            )),
        }
    }

    fn open_reader(
        &self,
        topics: &[String],
        _opts: ReaderOptions,
    ) -> Result<Box<dyn TransportReader>, BusError> {
        let subscription = self.store.subscribe(topics)?;
        Ok(Box::new(PubSubReader { subscription }))
    }
}

struct PubSubReader {
    subscription: Box<dyn Subscription>,
}

impl TransportReader for PubSubReader {
    fn read(&mut self, block: Duration) -> Result<Vec<Delivery>, BusError> {
        match self.subscription.next(block)? {
            Some((topic, payload)) => Ok(vec![Delivery::Raw { topic, payload }]),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn fans_out_to_every_open_reader() {
        let transport = PubSubTransport::new(Arc::new(MemoryStore::new()));
        let topics = vec!["news".to_string()];
        let mut a = transport.open_reader(&topics, ReaderOptions::default()).unwrap();
        let mut b = transport.open_reader(&topics, ReaderOptions::default()).unwrap();

        transport
            .send("news", Outgoing::Raw(b"flash".to_vec()), &PublishOptions::default())
            .unwrap();

        for reader in [&mut a, &mut b] {
            let deliveries = reader.read(Duration::from_millis(50)).unwrap();
            assert_eq!(deliveries.len(), 1);
        }
    }

    #[test]
    fn late_subscriber_misses_earlier_messages() {
        let transport = PubSubTransport::new(Arc::new(MemoryStore::new()));
        transport
            .send("news", Outgoing::Raw(b"early".to_vec()), &PublishOptions::default())
            .unwrap();

        let mut late = transport
            .open_reader(&["news".to_string()], ReaderOptions::default())
            .unwrap();
        assert!(late.read(Duration::from_millis(5)).unwrap().is_empty());
    }
}
