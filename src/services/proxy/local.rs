//! Local proxy: direct dispatch into another actor's event queue.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::LatticeResult;
use crate::domain::models::RpcEnvelope;
use crate::services::kernel::actor::ActorHandle;
use crate::services::rpc::RpcManager;

use super::{Proxy, ProxyType};

/// Reaches an actor in the same container by posting events directly,
/// bypassing serialization. Responses still pass the RPC manager so their
/// pending entries resolve.
pub struct LocalProxy {
    handle: ActorHandle,
    rpc: Arc<RpcManager>,
}

impl LocalProxy {
    pub fn new(handle: ActorHandle, rpc: Arc<RpcManager>) -> Self {
        Self { handle, rpc }
    }
}

#[async_trait]
impl Proxy for LocalProxy {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Local
    }

    fn target(&self) -> &str {
        self.handle.name()
    }

    async fn execute(&self, envelope: RpcEnvelope) -> LatticeResult<()> {
        if self.rpc.resolve_response(&envelope) {
            return Ok(());
        }
        self.handle.deliver(envelope)
    }
}
