//! Remote proxy: serialized dispatch over the message transport.
//!
//! Each actor listens on a topic named after it. `spawn_consumer` runs the
//! inbound dispatcher for one actor: decode bus records, drop duplicates by
//! message id, and deliver to the actor's queue through the RPC manager so
//! responses complete their pending requests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::domain::errors::LatticeResult;
use crate::domain::models::{Id, RpcEnvelope};
use crate::domain::ports::{MessageTransport, TopicProducer};
use crate::services::rpc::RpcManager;

use super::{Proxy, ProxyType};

/// Reaches a peer through its transport topic.
pub struct RemoteProxy {
    topic: String,
    producer: Arc<dyn TopicProducer>,
}

impl RemoteProxy {
    pub fn new(topic: impl Into<String>, producer: Arc<dyn TopicProducer>) -> Self {
        Self {
            topic: topic.into(),
            producer,
        }
    }
}

#[async_trait]
impl Proxy for RemoteProxy {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Remote
    }

    fn target(&self) -> &str {
        &self.topic
    }

    async fn execute(&self, envelope: RpcEnvelope) -> LatticeResult<()> {
        let payload = serde_json::to_vec(&envelope)?;
        self.producer.produce(&self.topic, payload).await
    }
}

/// Bounded window of recently seen message ids.
///
/// The transport is at-least-once; re-delivered records inside the window
/// are dropped here, anything older is caught by per-reservation sequences.
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<Id>,
    seen: std::collections::HashSet<Id>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: std::collections::HashSet::with_capacity(capacity),
        }
    }

    /// Record the id; returns false if it was already in the window.
    pub fn insert(&mut self, id: Id) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Run the inbound dispatcher for one actor's topic.
pub fn spawn_consumer(
    actor_name: String,
    transport: &Arc<dyn MessageTransport>,
    rpc: Arc<RpcManager>,
) -> LatticeResult<JoinHandle<()>> {
    let mut records = transport.subscribe(&actor_name)?;
    let handle = tokio::spawn(async move {
        let mut window = DedupWindow::new(1024);
        while let Some(record) = records.recv().await {
            let envelope: RpcEnvelope = match serde_json::from_slice(&record) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::warn!(actor = %actor_name, %error, "dropping undecodable record");
                    continue;
                }
            };
            if !window.insert(envelope.message_id) {
                tracing::debug!(actor = %actor_name, message_id = %envelope.message_id, "duplicate record dropped");
                continue;
            }
            rpc.deliver(&actor_name, envelope);
        }
        tracing::debug!(actor = %actor_name, "consumer loop ended");
    });
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_window_drops_repeats_and_evicts() {
        let mut window = DedupWindow::new(2);
        let a = Id::new();
        let b = Id::new();
        let c = Id::new();
        assert!(window.insert(a));
        assert!(!window.insert(a));
        assert!(window.insert(b));
        assert!(window.insert(c));
        // `a` evicted, so it is accepted again
        assert!(window.insert(a));
    }
}
