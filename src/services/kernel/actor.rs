//! The actor kernel: one task owning all mutable state for one actor.
//!
//! External callers interact through [`ActorHandle`], which posts events and
//! never touches state directly. The loop waits on the event and timer
//! queues, drains both into local batches, and processes events before
//! timers. A handler error is logged and never tears down the loop.
//!
//! Transitions become externally visible only after they are persisted:
//! handlers stage outbound RPCs and configuration actions, and
//! [`Actor::commit`] releases them once the dirty entities are stored.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    ActorClock, ActorRole, AuthToken, ConfigAction, Delegation, Id, PendingState, Reservation,
    ReservationSet, RpcEnvelope, Slice, Term, Unit,
};
use crate::domain::ports::{ConfigComplete, ConfigSink, ConfigurationHandler, Policy, Stores};
use crate::services::registry::ProxyRegistry;
use crate::services::rpc::RpcManager;

use super::events::{ActorEvent, ActorFn};

/// An outbound RPC staged by a handler, released after the dirty state that
/// produced it has been persisted.
pub(crate) struct StagedSend {
    pub target: String,
    pub envelope: RpcEnvelope,
}

/// A configuration action staged for dispatch to the external handler.
pub(crate) struct StagedConfig {
    pub action: ConfigAction,
    pub unit: Unit,
}

/// A store deletion staged by an unregister operation.
pub(crate) enum StagedRemoval {
    Slice(Id),
    Reservation(Id),
    Delegation(Id),
}

/// Operations requested before recovery completed, issued on the first
/// post-recovery tick.
#[derive(Default)]
pub(crate) struct DeferredOps {
    pub ticketing: ReservationSet,
    pub extending_ticket: ReservationSet,
    pub redeeming: ReservationSet,
    pub extending_lease: ReservationSet,
    pub modifying_lease: ReservationSet,
    pub closing: ReservationSet,
}

/// Kernel state of one actor. Lives on the actor task; all mutation happens
/// there.
pub struct Actor {
    pub(crate) identity: AuthToken,
    pub(crate) role: ActorRole,
    pub(crate) clock: ActorClock,
    pub(crate) policy: Box<dyn Policy>,
    pub(crate) stores: Stores,
    pub(crate) config_handler: Arc<dyn ConfigurationHandler>,
    pub(crate) proxies: Arc<ProxyRegistry>,
    pub(crate) rpc: Arc<RpcManager>,

    pub(crate) slices: BTreeMap<Id, Slice>,
    pub(crate) reservations: BTreeMap<Id, Reservation>,
    pub(crate) delegations: BTreeMap<Id, Delegation>,

    pub(crate) recovered: bool,
    pub(crate) current_cycle: Option<u64>,
    pub(crate) first_tick: bool,
    pub(crate) deferred: DeferredOps,

    pub(crate) staged_sends: Vec<StagedSend>,
    pub(crate) staged_configs: Vec<StagedConfig>,
    pub(crate) staged_removals: Vec<StagedRemoval>,
    pub(crate) dirty_slices: BTreeSet<Id>,
    pub(crate) new_slices: BTreeSet<Id>,
    pub(crate) new_reservations: BTreeSet<Id>,
    pub(crate) new_delegations: BTreeSet<Id>,
    pub(crate) new_units: BTreeSet<Id>,

    pub(crate) handle: ActorHandle,
    pending_tx: watch::Sender<usize>,
    stopped_tx: watch::Sender<bool>,
}

/// Thread-safe handle to an actor: queue events, call in synchronously, and
/// drive the protocol surface.
#[derive(Clone)]
pub struct ActorHandle {
    name: String,
    guid: Id,
    identity: AuthToken,
    role: ActorRole,
    events: mpsc::UnboundedSender<ActorEvent>,
    timers: mpsc::UnboundedSender<ActorEvent>,
    pending: watch::Receiver<usize>,
    stopped: watch::Receiver<bool>,
}

impl Actor {
    /// Build the actor and its handle. The caller spawns [`Actor::run`] on
    /// the runtime; events queued before that are processed after recovery.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: AuthToken,
        role: ActorRole,
        clock: ActorClock,
        mut policy: Box<dyn Policy>,
        stores: Stores,
        config_handler: Arc<dyn ConfigurationHandler>,
        proxies: Arc<ProxyRegistry>,
        rpc: Arc<RpcManager>,
    ) -> LatticeResult<(
        Self,
        ActorHandle,
        mpsc::UnboundedReceiver<ActorEvent>,
        mpsc::UnboundedReceiver<ActorEvent>,
    )> {
        if identity.name.is_empty() {
            return Err(LatticeError::InvalidActor("actor has no name".into()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = watch::channel(0usize);
        let (stopped_tx, stopped_rx) = watch::channel(false);

        policy.set_actor(&identity);

        let handle = ActorHandle {
            name: identity.name.clone(),
            guid: identity.guid,
            identity: identity.clone(),
            role,
            events: events_tx,
            timers: timers_tx,
            pending: pending_rx,
            stopped: stopped_rx,
        };

        let actor = Self {
            identity,
            role,
            clock,
            policy,
            stores,
            config_handler,
            proxies,
            rpc,
            slices: BTreeMap::new(),
            reservations: BTreeMap::new(),
            delegations: BTreeMap::new(),
            recovered: false,
            current_cycle: None,
            first_tick: true,
            deferred: DeferredOps::default(),
            staged_sends: Vec::new(),
            staged_configs: Vec::new(),
            staged_removals: Vec::new(),
            dirty_slices: BTreeSet::new(),
            new_slices: BTreeSet::new(),
            new_reservations: BTreeSet::new(),
            new_delegations: BTreeSet::new(),
            new_units: BTreeSet::new(),
            handle: handle.clone(),
            pending_tx,
            stopped_tx,
        };

        Ok((actor, handle, events_rx, timers_rx))
    }

    /// Main loop. Recovery runs before the first event is processed.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ActorEvent>,
        mut timers: mpsc::UnboundedReceiver<ActorEvent>,
    ) {
        if let Err(error) = self.recover().await {
            tracing::error!(actor = %self.identity.name, %error, "recovery failed");
        }
        self.commit().await;

        'main: loop {
            let mut event_batch: Vec<ActorEvent> = Vec::new();
            let mut timer_batch: Vec<ActorEvent> = Vec::new();

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event_batch.push(event),
                    None => break 'main,
                },
                timer = timers.recv() => match timer {
                    Some(timer) => timer_batch.push(timer),
                    None => break 'main,
                },
            }
            while let Ok(event) = events.try_recv() {
                event_batch.push(event);
            }
            while let Ok(timer) = timers.try_recv() {
                timer_batch.push(timer);
            }

            // Events first, then timers.
            for event in event_batch.into_iter().chain(timer_batch) {
                if matches!(event, ActorEvent::Stop) {
                    tracing::info!(actor = %self.identity.name, "actor exiting");
                    break 'main;
                }
                self.process_event(event).await;
            }
        }

        self.rpc.cancel_actor(&self.identity.name);
        let _ = self.stopped_tx.send(true);
    }

    async fn process_event(&mut self, event: ActorEvent) {
        tracing::trace!(actor = %self.identity.name, ?event, "processing event");
        match event {
            ActorEvent::Tick { cycle } => self.actor_tick(cycle),
            ActorEvent::Incoming(envelope) => self.handle_incoming(*envelope),
            ActorEvent::ConfigComplete(completion) => self.handle_config_complete(completion),
            ActorEvent::Invoke(runnable) => runnable(self),
            ActorEvent::Stop => unreachable!("stop handled by the loop"),
        }
        self.commit().await;
    }

    /// Tick handling with catch-up: each intermediate cycle is replayed
    /// through the full prepare/handle/finish/probe pipeline.
    fn actor_tick(&mut self, cycle: u64) {
        if !self.recovered {
            tracing::warn!(actor = %self.identity.name, cycle, "tick before recovery completed");
            return;
        }

        let start = if self.first_tick {
            cycle
        } else {
            match self.current_cycle {
                Some(current) if current >= cycle => return,
                Some(current) => current + 1,
                None => cycle,
            }
        };

        for current in start..=cycle {
            tracing::debug!(actor = %self.identity.name, cycle = current, "tick start");
            self.current_cycle = Some(current);
            self.policy.prepare(current);
            if self.first_tick {
                self.issue_deferred();
            }
            self.tick_handler(current);
            self.policy.finish(current);
            self.probe_reservations(current);
            self.first_tick = false;
            tracing::debug!(actor = %self.identity.name, cycle = current, "tick end");
        }
    }

    /// Role-specific per-cycle work. All roles close expired holdings.
    fn tick_handler(&mut self, cycle: u64) {
        let mut due = self.policy.closing(cycle);
        let boundary = self.clock.cycle_start_millis(cycle);
        for (rid, reservation) in &self.reservations {
            if reservation.is_active()
                && reservation.pending == PendingState::None
                && reservation.expired(boundary)
            {
                due.push(*rid);
            }
        }
        due.sort_unstable();
        due.dedup();
        if !due.is_empty() {
            tracing::info!(actor = %self.identity.name, cycle, count = due.len(), "closing expired reservations");
            self.close_reservations(&due);
        }
    }

    fn handle_incoming(&mut self, envelope: RpcEnvelope) {
        use crate::domain::models::RpcKind;

        let result = match envelope.kind {
            RpcKind::Ticket => self.broker_handle_ticket(&envelope),
            RpcKind::ExtendTicket => self.broker_handle_extend_ticket(&envelope),
            RpcKind::Relinquish => self.broker_handle_relinquish(&envelope),
            RpcKind::Redeem => self.authority_handle_redeem(&envelope),
            RpcKind::ExtendLease => self.authority_handle_extend_lease(&envelope),
            RpcKind::ModifyLease => self.authority_handle_modify_lease(&envelope),
            RpcKind::Close => self.authority_handle_close(&envelope),
            RpcKind::ClaimDelegation => self.authority_handle_claim(&envelope),
            RpcKind::ReclaimDelegation => self.authority_handle_reclaim(&envelope),
            RpcKind::UpdateTicket => self.client_handle_update_ticket(&envelope),
            RpcKind::UpdateLease => self.client_handle_update_lease(&envelope),
            RpcKind::UpdateDelegation => self.broker_handle_update_delegation(&envelope),
            RpcKind::Query => self.handle_query(&envelope),
            RpcKind::QueryResult => Ok(()),
            RpcKind::FailedRpc => self.process_failed_rpc_envelope(&envelope),
        };

        if let Err(error) = result {
            tracing::error!(
                actor = %self.identity.name,
                kind = envelope.kind.as_str(),
                message_id = %envelope.message_id,
                %error,
                "inbound message handling failed"
            );
        }
    }

    /// Persist every dirty entity, then release staged configuration
    /// actions and outbound RPCs. A store failure keeps entities dirty and
    /// drops the staged work; a later tick retries persistence.
    pub(crate) async fn commit(&mut self) {
        if let Err(error) = self.persist_dirty().await {
            tracing::error!(actor = %self.identity.name, %error, "persist failed; dropping staged work");
            self.staged_sends.clear();
            self.staged_configs.clear();
            self.refresh_pending_gauge();
            return;
        }

        for removal in std::mem::take(&mut self.staged_removals) {
            let result = match removal {
                StagedRemoval::Slice(id) => self.stores.remove_slice(id).await,
                StagedRemoval::Reservation(id) => self.stores.remove_reservation(id).await,
                StagedRemoval::Delegation(id) => {
                    self.stores.delegations.remove_delegation(self.stores.actor_id, id).await
                }
            };
            if let Err(error) = result {
                tracing::warn!(actor = %self.identity.name, %error, "staged removal failed");
            }
        }

        for staged in std::mem::take(&mut self.staged_configs) {
            let result = self
                .config_handler
                .start(staged.action, &staged.unit, &self.handle)
                .await;
            if let Err(error) = result {
                tracing::warn!(
                    actor = %self.identity.name,
                    unit = %staged.unit.id,
                    action = staged.action.as_str(),
                    %error,
                    "configuration dispatch failed"
                );
                self.handle.complete(ConfigComplete {
                    unit_id: staged.unit.id,
                    reservation_id: staged.unit.reservation_id,
                    action: staged.action,
                    sequence: staged.unit.sequence,
                    error: Some(error.to_string()),
                });
            }
        }

        for staged in std::mem::take(&mut self.staged_sends) {
            let proxy = self.proxies.route(&staged.target);
            self.rpc
                .send(&self.identity.name, proxy, staged.envelope)
                .await;
        }

        self.refresh_pending_gauge();
    }

    async fn persist_dirty(&mut self) -> LatticeResult<()> {
        let dirty_slices: Vec<Id> = std::mem::take(&mut self.dirty_slices).into_iter().collect();
        for slice_id in &dirty_slices {
            let Some(slice) = self.slices.get(slice_id) else {
                continue;
            };
            let result = if self.new_slices.contains(slice_id) {
                self.stores.add_slice(slice).await
            } else {
                self.stores.update_slice(slice).await
            };
            if let Err(error) = result {
                self.dirty_slices.extend(dirty_slices.iter().copied());
                return Err(error);
            }
            self.new_slices.remove(slice_id);
        }

        let dirty_rids: Vec<Id> = self
            .reservations
            .iter()
            .filter(|(_, r)| r.dirty)
            .map(|(rid, _)| *rid)
            .collect();
        for rid in dirty_rids {
            self.persist_reservation(rid).await?;
        }

        let dirty_dids: Vec<Id> = self
            .delegations
            .iter()
            .filter(|(_, d)| d.dirty)
            .map(|(did, _)| *did)
            .collect();
        for did in dirty_dids {
            let delegation = self.delegations.get(&did).expect("delegation present");
            let result = if self.new_delegations.contains(&did) {
                self.stores.add_delegation(delegation).await
            } else {
                self.stores.update_delegation(delegation).await
            };
            result?;
            self.new_delegations.remove(&did);
            if let Some(delegation) = self.delegations.get_mut(&did) {
                delegation.clear_dirty();
            }
        }

        Ok(())
    }

    async fn persist_reservation(&mut self, rid: Id) -> LatticeResult<()> {
        let reservation = self.reservations.get(&rid).expect("reservation present");

        // Units travel inside the reservation blob; the units table is the
        // queryable index and is kept in step here.
        let units: Vec<Unit> = reservation
            .resources
            .as_ref()
            .and_then(|r| r.unit_set())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        if self.new_reservations.contains(&rid) {
            self.stores.add_reservation(reservation).await?;
        } else {
            self.stores.update_reservation(reservation).await?;
        }
        self.new_reservations.remove(&rid);

        for unit in units {
            if self.new_units.contains(&unit.id) {
                self.stores.add_unit(&unit, false).await?;
                self.new_units.remove(&unit.id);
            } else {
                self.stores.update_unit(&unit).await?;
            }
        }

        if let Some(reservation) = self.reservations.get_mut(&rid) {
            reservation.clear_dirty();
        }
        Ok(())
    }

    pub(crate) fn refresh_pending_gauge(&self) {
        let pending = self
            .reservations
            .values()
            .filter(|r| r.pending != PendingState::None)
            .count();
        let _ = self.pending_tx.send(pending);
    }
}

impl ActorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guid(&self) -> Id {
        self.guid
    }

    pub fn identity(&self) -> &AuthToken {
        &self.identity
    }

    pub fn role(&self) -> ActorRole {
        self.role
    }

    /// Thread-safe enqueue of a unit of work.
    pub fn queue_event(&self, event: ActorEvent) -> LatticeResult<()> {
        self.events
            .send(event)
            .map_err(|_| LatticeError::InvalidActor(format!("{} is stopped", self.name)))
    }

    /// Deliver an inbound protocol message.
    pub fn deliver(&self, envelope: RpcEnvelope) -> LatticeResult<()> {
        self.queue_event(ActorEvent::Incoming(Box::new(envelope)))
    }

    /// Enqueue onto the timer queue (deadline firings).
    pub fn queue_timer_envelope(&self, envelope: RpcEnvelope) -> LatticeResult<()> {
        self.timers
            .send(ActorEvent::Incoming(Box::new(envelope)))
            .map_err(|_| LatticeError::InvalidActor(format!("{} is stopped", self.name)))
    }

    /// External monotonic time signal.
    pub fn tick(&self, cycle: u64) -> LatticeResult<()> {
        self.queue_event(ActorEvent::Tick { cycle })
    }

    /// Run a closure on the actor task and wait for its result.
    pub async fn execute<R, F>(&self, f: F) -> LatticeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Actor) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let runnable: ActorFn = Box::new(move |actor| {
            let _ = tx.send(f(actor));
        });
        self.queue_event(ActorEvent::Invoke(runnable))?;
        rx.await
            .map_err(|_| LatticeError::InvalidActor(format!("{} stopped mid-call", self.name)))
    }

    /// Block until every owned reservation has no pending operation.
    pub async fn await_no_pending_reservations(&self) {
        let mut watcher = self.pending.clone();
        loop {
            if *watcher.borrow() == 0 {
                return;
            }
            if watcher.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the actor: queued but unprocessed events are dropped, pending
    /// RPCs are cancelled. Returns once the loop has exited, after which no
    /// further handler executes.
    pub async fn stop(&self) {
        if self.queue_event(ActorEvent::Stop).is_err() {
            return;
        }
        let mut stopped = self.stopped.clone();
        loop {
            if *stopped.borrow() {
                return;
            }
            if stopped.changed().await.is_err() {
                return;
            }
        }
    }

    // --- protocol surface -------------------------------------------------

    /// Register a slice. The kind must already be set correctly for this
    /// actor's role.
    pub async fn register_slice(&self, slice: Slice) -> LatticeResult<Id> {
        self.execute(move |actor| actor.register_slice(slice)).await?
    }

    /// Unregister an empty slice.
    pub async fn unregister_slice(&self, slice_id: Id) -> LatticeResult<()> {
        self.execute(move |actor| actor.unregister_slice(slice_id)).await?
    }

    /// Submit a client reservation: register it and start ticketing against
    /// its broker (deferred until recovery completes).
    pub async fn submit_ticket(&self, reservation: Reservation) -> LatticeResult<Id> {
        self.execute(move |actor| actor.submit_ticket(reservation)).await?
    }

    /// Request a ticket extension to `new_term`.
    pub async fn extend_ticket(&self, rid: Id, new_term: Term) -> LatticeResult<()> {
        self.execute(move |actor| actor.start_extend_ticket(rid, new_term)).await?
    }

    /// Redeem a held ticket at its authority.
    pub async fn redeem(&self, rid: Id) -> LatticeResult<()> {
        self.execute(move |actor| actor.start_redeem(rid)).await?
    }

    /// Extend the lease after a successful ticket extension.
    pub async fn extend_lease(&self, rid: Id) -> LatticeResult<()> {
        self.execute(move |actor| actor.start_extend_lease(rid)).await?
    }

    /// Modify the active lease's configuration properties.
    pub async fn modify_lease(
        &self,
        rid: Id,
        properties: BTreeMap<String, String>,
    ) -> LatticeResult<()> {
        self.execute(move |actor| actor.start_modify_lease(rid, properties)).await?
    }

    /// Close a reservation.
    pub async fn close(&self, rid: Id) -> LatticeResult<()> {
        self.execute(move |actor| actor.start_close(rid)).await?
    }

    /// Close every reservation in a slice; per-reservation failures are
    /// recorded on the reservation and do not stop the sweep.
    pub async fn close_slice_reservations(&self, slice_id: Id) -> LatticeResult<()> {
        self.execute(move |actor| {
            let rids: Vec<Id> = actor
                .slices
                .get(&slice_id)
                .map(|s| s.reservations.iter().copied().collect())
                .ok_or(LatticeError::NoSuchSlice(slice_id))?;
            actor.close_reservations(&rids);
            Ok(())
        })
        .await?
    }

    /// Force a reservation into `Failed`; always accepted.
    pub async fn fail(&self, rid: Id, message: String) -> LatticeResult<()> {
        self.execute(move |actor| actor.fail_reservation(rid, &message)).await?
    }

    /// Register an inventory delegation (authority side).
    pub async fn register_delegation(&self, delegation: Delegation) -> LatticeResult<Id> {
        self.execute(move |actor| actor.register_delegation(delegation)).await?
    }

    /// Claim a delegation from an authority (broker side).
    pub async fn claim_delegation(&self, did: Id, authority: String) -> LatticeResult<()> {
        self.execute(move |actor| actor.broker_claim_delegation(did, &authority)).await?
    }

    /// Return a claimed delegation to its authority (broker side).
    pub async fn reclaim_delegation(&self, did: Id) -> LatticeResult<()> {
        self.execute(move |actor| actor.broker_reclaim_delegation(did)).await?
    }

    // --- introspection ----------------------------------------------------

    pub async fn get_reservation(&self, rid: Id) -> LatticeResult<Option<Reservation>> {
        self.execute(move |actor| actor.reservations.get(&rid).cloned()).await
    }

    pub async fn get_slice(&self, slice_id: Id) -> LatticeResult<Option<Slice>> {
        self.execute(move |actor| actor.slices.get(&slice_id).cloned()).await
    }

    pub async fn get_delegation(&self, did: Id) -> LatticeResult<Option<Delegation>> {
        self.execute(move |actor| actor.delegations.get(&did).cloned()).await
    }

    pub async fn current_cycle(&self) -> LatticeResult<Option<u64>> {
        self.execute(|actor| actor.current_cycle).await
    }

    pub async fn is_recovered(&self) -> LatticeResult<bool> {
        self.execute(|actor| actor.recovered).await
    }
}

impl ConfigSink for ActorHandle {
    fn complete(&self, completion: ConfigComplete) {
        if let Err(error) = self.queue_event(ActorEvent::ConfigComplete(completion)) {
            tracing::debug!(actor = %self.name, %error, "config completion dropped");
        }
    }
}
