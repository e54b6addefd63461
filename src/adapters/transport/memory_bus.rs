//! In-memory topic bus.
//!
//! Stands in for the production message broker: named topics, non-blocking
//! produce, per-subscriber fan-out. Tests can install a drop filter to
//! simulate lost records.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::ports::{MessageTransport, TopicProducer};

type DropFilter = Box<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;

#[derive(Default)]
struct BusState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

/// In-process transport with broker-like topic semantics.
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<BusState>,
    drop_filter: Mutex<Option<DropFilter>>,
    /// When set, produce calls fail outright.
    failing: Mutex<bool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records matching the predicate instead of delivering them.
    /// Delivery still reports success, like a broker that accepted the
    /// record but lost it before the consumer read it.
    pub fn set_drop_filter(&self, filter: impl Fn(&str, &[u8]) -> bool + Send + Sync + 'static) {
        *self.drop_filter.lock().unwrap() = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        *self.drop_filter.lock().unwrap() = None;
    }

    /// Make produce calls fail, simulating a broker outage.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl TopicProducer for MemoryBus {
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> LatticeResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(LatticeError::TransportFailure(format!(
                "produce to {topic} refused"
            )));
        }

        if let Some(filter) = self.drop_filter.lock().unwrap().as_ref() {
            if filter(topic, &payload) {
                tracing::debug!(topic, "memory bus dropped record by filter");
                return Ok(());
            }
        }

        let mut state = self.state.lock().unwrap();
        if let Some(senders) = state.subscribers.get_mut(topic) {
            // Prune subscribers whose receiving side is gone.
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for MemoryBus {
    fn subscribe(&self, topic: &str) -> LatticeResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("topic").unwrap();
        let mut b = bus.subscribe("topic").unwrap();
        bus.produce("topic", b"record".to_vec()).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"record");
        assert_eq!(b.recv().await.unwrap(), b"record");
    }

    #[tokio::test]
    async fn drop_filter_swallows_records() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe("topic").unwrap();
        bus.set_drop_filter(|topic, _| topic == "topic");
        bus.produce("topic", b"lost".to_vec()).await.unwrap();
        bus.clear_drop_filter();
        bus.produce("topic", b"kept".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"kept");
    }

    #[tokio::test]
    async fn failing_bus_rejects_produce() {
        let bus = MemoryBus::new();
        bus.set_failing(true);
        let err = bus.produce("topic", vec![]).await.unwrap_err();
        assert!(matches!(err, LatticeError::TransportFailure(_)));
    }
}
