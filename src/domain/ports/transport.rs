//! Message-transport port.
//!
//! The remote binding (kafka in production) is abstracted to named topics
//! with at-least-once delivery; consumers tolerate duplicates through the
//! message-id window and per-reservation sequences.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::LatticeResult;

/// Producer half: non-blocking enqueue of a serialized envelope.
#[async_trait]
pub trait TopicProducer: Send + Sync {
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> LatticeResult<()>;
}

/// Full transport: producing plus per-topic subscription.
#[async_trait]
pub trait MessageTransport: TopicProducer {
    /// Subscribe to a topic. Each subscriber receives every record produced
    /// after the subscription.
    fn subscribe(&self, topic: &str) -> LatticeResult<mpsc::UnboundedReceiver<Vec<u8>>>;
}
