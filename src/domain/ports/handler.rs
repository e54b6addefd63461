//! Configuration-handler port: join/modify/leave actions on units.
//!
//! The handler drives the external provisioning system. Actions complete
//! asynchronously; the handler posts a [`ConfigComplete`] through the sink
//! it was constructed with, and must be idempotent per
//! `(unit id, sequence)` so recovery can re-issue in-flight actions.

use async_trait::async_trait;

use crate::domain::errors::LatticeResult;
use crate::domain::models::{ConfigAction, Id, Unit};

/// Completion of a configuration action, posted back to the owning actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigComplete {
    pub unit_id: Id,
    pub reservation_id: Id,
    pub action: ConfigAction,
    pub sequence: u64,
    /// `None` on success; the failure text otherwise.
    pub error: Option<String>,
}

impl ConfigComplete {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Sink for completions; implemented by the actor handle.
pub trait ConfigSink: Send + Sync {
    fn complete(&self, completion: ConfigComplete);
}

/// External provisioning driver.
#[async_trait]
pub trait ConfigurationHandler: Send + Sync {
    /// Start a configuration action for a unit. The `sequence` identifies
    /// the action for idempotent re-issue after a crash.
    async fn start(
        &self,
        action: ConfigAction,
        unit: &Unit,
        sink: &dyn ConfigSink,
    ) -> LatticeResult<()>;
}
