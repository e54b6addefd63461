//! Request/response correlation with per-request deadlines.
//!
//! Every outbound request that expects a response is tracked in the pending
//! table until the response arrives, the deadline fires, the transport send
//! fails, or the originating actor stops. All four paths resolve the entry
//! exactly once; the latter three deliver a synthetic `FailedRpc` to the
//! originating actor.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    AuthToken, FailedRpcInfo, FailureKind, Id, RpcEnvelope, RpcKind, RpcPayload,
};
use crate::services::proxy::Proxy;
use crate::services::registry::ActorRegistry;

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct RpcManagerConfig {
    /// Deadline for a response before a synthetic transport timeout.
    pub timeout: Duration,
    /// Upper bound on produce retries before reporting transport failure.
    pub produce_retry_window: Duration,
}

impl Default for RpcManagerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            produce_retry_window: Duration::from_secs(2),
        }
    }
}

struct PendingRpc {
    kind: RpcKind,
    origin: String,
    origin_auth: AuthToken,
    reservation_id: Option<Id>,
    delegation_id: Option<Id>,
    query_reply: Option<oneshot::Sender<BTreeMap<String, String>>>,
    timer: Option<JoinHandle<()>>,
}

/// Outbound dispatch and inbound correlation for every actor in the
/// container. The pending table is shared; entries are keyed by message id.
pub struct RpcManager {
    registry: Arc<ActorRegistry>,
    pending: Mutex<HashMap<Id, PendingRpc>>,
    config: RpcManagerConfig,
}

impl RpcManager {
    pub fn new(registry: Arc<ActorRegistry>, config: RpcManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Number of outstanding requests (all actors).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Dispatch an outbound request. Registers a pending entry when the
    /// request expects a response, then hands the envelope to the proxy;
    /// a failed produce resolves the entry with `TransportFailure`.
    pub async fn send(self: &Arc<Self>, origin: &str, proxy: Arc<dyn Proxy>, envelope: RpcEnvelope) {
        if envelope.kind.expected_response().is_some() {
            self.register_pending(origin, &envelope, None);
        }

        let produce = {
            let policy = ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(50))
                .with_max_elapsed_time(Some(self.config.produce_retry_window))
                .build();
            let envelope = envelope.clone();
            backoff::future::retry(policy, || {
                let proxy = proxy.clone();
                let envelope = envelope.clone();
                async move { proxy.execute(envelope).await.map_err(backoff::Error::transient) }
            })
            .await
        };

        if let Err(error) = produce {
            tracing::warn!(origin, target = proxy.target(), %error, "outbound produce failed");
            self.resolve_failure(
                envelope.message_id,
                FailureKind::TransportFailure,
                error.to_string(),
                &envelope,
            );
        }
    }

    /// Dispatch a query and wait for the paired result.
    pub async fn query(
        self: &Arc<Self>,
        origin: &str,
        proxy: Arc<dyn Proxy>,
        envelope: RpcEnvelope,
    ) -> LatticeResult<BTreeMap<String, String>> {
        let (tx, rx) = oneshot::channel();
        self.register_pending(origin, &envelope, Some(tx));

        if let Err(error) = proxy.execute(envelope.clone()).await {
            self.resolve_failure(
                envelope.message_id,
                FailureKind::TransportFailure,
                error.to_string(),
                &envelope,
            );
            return Err(error);
        }

        rx.await
            .map_err(|_| LatticeError::TransportTimeout("query abandoned".into()))
    }

    /// Resolve a response against its pending entry: cancel the deadline
    /// timer and satisfy a waiting query. Returns true when the envelope was
    /// consumed by a query reply and must not be posted further.
    pub fn resolve_response(&self, envelope: &RpcEnvelope) -> bool {
        if let Some(request_id) = envelope.request_id {
            if let Some(entry) = self.take_pending(request_id) {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                if let Some(reply) = entry.query_reply {
                    if let RpcPayload::QueryResult(result) = &envelope.payload {
                        let _ = reply.send(result.clone());
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Deliver an inbound envelope to the named actor. Responses resolve
    /// their pending entry first; everything is then posted to the actor's
    /// event queue in arrival order.
    pub fn deliver(&self, target: &str, envelope: RpcEnvelope) {
        if self.resolve_response(&envelope) {
            return;
        }

        match self.registry.get(target) {
            Some(handle) => {
                if let Err(error) = handle.deliver(envelope) {
                    tracing::warn!(target, %error, "inbound delivery refused");
                }
            }
            None => tracing::warn!(target, "inbound message for unknown actor dropped"),
        }
    }

    /// Cancel every pending request originated by the named actor. The
    /// synthetic `Cancelled` failures are posted to its queue; a stopping
    /// actor drops them with the rest of its backlog.
    pub fn cancel_actor(&self, origin: &str) {
        let cancelled: Vec<(Id, PendingRpc)> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<Id> = pending
                .iter()
                .filter(|(_, p)| p.origin == origin)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        for (message_id, entry) in cancelled {
            if let Some(timer) = &entry.timer {
                timer.abort();
            }
            self.post_failed(
                message_id,
                &entry,
                FailureKind::Cancelled,
                "actor stopped with request outstanding".to_string(),
                false,
            );
        }
    }

    fn register_pending(
        self: &Arc<Self>,
        origin: &str,
        envelope: &RpcEnvelope,
        query_reply: Option<oneshot::Sender<BTreeMap<String, String>>>,
    ) {
        let message_id = envelope.message_id;
        let timer = {
            let manager = Arc::downgrade(self);
            let timeout = self.config.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(manager) = manager.upgrade() {
                    manager.timeout_request(message_id);
                }
            })
        };

        let entry = PendingRpc {
            kind: envelope.kind,
            origin: origin.to_string(),
            origin_auth: envelope.auth.clone(),
            reservation_id: envelope.reservation_id(),
            delegation_id: envelope.delegation_id(),
            query_reply,
            timer: Some(timer),
        };
        self.pending.lock().unwrap().insert(message_id, entry);
    }

    fn take_pending(&self, message_id: Id) -> Option<PendingRpc> {
        self.pending.lock().unwrap().remove(&message_id)
    }

    fn timeout_request(&self, message_id: Id) {
        if let Some(entry) = self.take_pending(message_id) {
            tracing::warn!(
                %message_id,
                kind = entry.kind.as_str(),
                origin = %entry.origin,
                "request deadline exceeded"
            );
            self.post_failed(
                message_id,
                &entry,
                FailureKind::TransportTimeout,
                format!("no response to {} within deadline", entry.kind),
                true,
            );
        }
    }

    fn resolve_failure(
        &self,
        message_id: Id,
        failure: FailureKind,
        details: String,
        envelope: &RpcEnvelope,
    ) {
        // Fire-and-forget requests have no pending entry; synthesize one so
        // the origin still learns about the transport failure.
        let entry = self.take_pending(message_id).unwrap_or_else(|| PendingRpc {
            kind: envelope.kind,
            origin: envelope.auth.name.clone(),
            origin_auth: envelope.auth.clone(),
            reservation_id: envelope.reservation_id(),
            delegation_id: envelope.delegation_id(),
            query_reply: None,
            timer: None,
        });
        if let Some(timer) = &entry.timer {
            timer.abort();
        }
        self.post_failed(message_id, &entry, failure, details, false);
    }

    fn post_failed(
        &self,
        message_id: Id,
        entry: &PendingRpc,
        failure: FailureKind,
        details: String,
        via_timer_queue: bool,
    ) {
        let info = FailedRpcInfo {
            request_id: message_id,
            failed_kind: entry.kind,
            reservation_id: entry.reservation_id,
            delegation_id: entry.delegation_id,
            failure,
            error_details: format!("{}: {details}", failure.as_str()),
        };
        let envelope = RpcEnvelope::request(
            RpcKind::FailedRpc,
            entry.origin.clone(),
            entry.origin_auth.clone(),
            RpcPayload::Failed(info),
        );

        match self.registry.get(&entry.origin) {
            Some(handle) => {
                let result = if via_timer_queue {
                    handle.queue_timer_envelope(envelope)
                } else {
                    handle.deliver(envelope)
                };
                if let Err(error) = result {
                    tracing::debug!(origin = %entry.origin, %error, "failed-rpc delivery dropped");
                }
            }
            None => tracing::debug!(origin = %entry.origin, "failed-rpc for unknown actor dropped"),
        }
    }
}
