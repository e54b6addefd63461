//! Configuration-handler adapters.
//!
//! The production handler drives a provisioning substrate; these adapters
//! cover contained deployments and tests: `NoopHandler` completes every
//! action immediately, `RecordingHandler` additionally records the dispatch
//! history so idempotent replay can be verified.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::LatticeResult;
use crate::domain::models::{ConfigAction, Id, Unit};
use crate::domain::ports::{ConfigComplete, ConfigSink, ConfigurationHandler};

/// Completes every configuration action immediately and successfully.
#[derive(Default)]
pub struct NoopHandler;

impl NoopHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConfigurationHandler for NoopHandler {
    async fn start(
        &self,
        action: ConfigAction,
        unit: &Unit,
        sink: &dyn ConfigSink,
    ) -> LatticeResult<()> {
        sink.complete(ConfigComplete {
            unit_id: unit.id,
            reservation_id: unit.reservation_id,
            action,
            sequence: unit.sequence,
            error: None,
        });
        Ok(())
    }
}

/// One recorded dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAction {
    pub unit_id: Id,
    pub action: ConfigAction,
    pub sequence: u64,
}

/// Completes actions immediately but keeps the dispatch history. Repeated
/// `(unit, sequence)` pairs are absorbed exactly like an idempotent
/// provisioning driver would.
#[derive(Default)]
pub struct RecordingHandler {
    history: Mutex<Vec<RecordedAction>>,
    /// Actions completed once already; replays are acknowledged without
    /// re-execution.
    applied: Mutex<std::collections::HashSet<(Id, u64)>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<RecordedAction> {
        self.history.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self, unit_id: Id) -> usize {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.unit_id == unit_id)
            .count()
    }
}

#[async_trait]
impl ConfigurationHandler for RecordingHandler {
    async fn start(
        &self,
        action: ConfigAction,
        unit: &Unit,
        sink: &dyn ConfigSink,
    ) -> LatticeResult<()> {
        let first_time = self.applied.lock().unwrap().insert((unit.id, unit.sequence));
        self.history.lock().unwrap().push(RecordedAction {
            unit_id: unit.id,
            action,
            sequence: unit.sequence,
        });
        if !first_time {
            tracing::debug!(unit = %unit.id, sequence = unit.sequence, "idempotent replay absorbed");
        }
        sink.complete(ConfigComplete {
            unit_id: unit.id,
            reservation_id: unit.reservation_id,
            action,
            sequence: unit.sequence,
            error: None,
        });
        Ok(())
    }
}
