//! Peer proxies: how one actor reaches another.
//!
//! Two transports, selected at proxy construction: local (in-process event
//! post, no serialization) and remote (serialized onto a named transport
//! topic). Kernel and policy code only ever see the [`Proxy`] interface.

pub mod local;
pub mod remote;

use async_trait::async_trait;

use crate::domain::errors::LatticeResult;
use crate::domain::models::RpcEnvelope;

pub use local::LocalProxy;
pub use remote::{spawn_consumer, RemoteProxy};

/// Transport selector recorded in the proxy registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    /// In-process dispatch for actors in the same container.
    Local,
    /// Asynchronous message transport (kafka in production).
    Remote,
}

/// A reachable peer.
#[async_trait]
pub trait Proxy: Send + Sync {
    fn proxy_type(&self) -> ProxyType;

    /// Name of the peer this proxy reaches.
    fn target(&self) -> &str;

    /// Hand the prepared request to the transport.
    async fn execute(&self, envelope: RpcEnvelope) -> LatticeResult<()>;
}
