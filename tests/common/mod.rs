//! Shared harness: a container with the three actor roles wired over the
//! in-memory bus, plus helpers for async condition waiting and stallable
//! configuration handlers.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use lattice::adapters::transport::MemoryBus;
use lattice::domain::errors::LatticeResult;
use lattice::domain::models::{
    ActorClock, ActorConfig, ActorRole, Config, ConfigAction, Delegation, DelegationState, Id,
    PendingState, Reservation, ReservationState, ResourceSet, ResourceType, Slice, SliceKind, Term,
    Unit,
};
use lattice::domain::ports::{ConfigComplete, ConfigSink, ConfigurationHandler};
use lattice::services::kernel::ActorHandle;
use lattice::services::policy::PolicyStats;
use lattice::services::Container;

pub const ORCHESTRATOR: &str = "orchestrator";
pub const BROKER: &str = "broker";
pub const AUTHORITY: &str = "site";

pub struct TestBed {
    pub bus: Arc<MemoryBus>,
    pub container: Container,
    pub pool: sqlx::SqlitePool,
    pub clock: ActorClock,
    pub orchestrator: ActorHandle,
    pub orchestrator_stats: Arc<PolicyStats>,
    pub broker: ActorHandle,
    pub broker_stats: Arc<PolicyStats>,
    pub authority: ActorHandle,
    pub authority_stats: Arc<PolicyStats>,
    pub slice_id: Id,
    pub delegation_id: Id,
}

pub fn manual_config() -> Config {
    let mut config = Config::default();
    config.time.beginning_of_time = 0;
    config.time.cycle_millis = 1000;
    config.time.manual = true;
    config
}

pub fn actor_config(name: &str, role: ActorRole) -> ActorConfig {
    ActorConfig {
        name: name.to_string(),
        role,
        policy: "default".to_string(),
        description: None,
    }
}

/// Poll an async condition until it holds or the deadline passes.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}

/// Current `(state, pending)` of a reservation on an actor.
pub async fn composite_state(
    handle: &ActorHandle,
    rid: Id,
) -> Option<(ReservationState, PendingState)> {
    handle
        .get_reservation(rid)
        .await
        .ok()
        .flatten()
        .map(|r| (r.state, r.pending))
}

pub async fn wait_for_state(
    handle: &ActorHandle,
    rid: Id,
    state: ReservationState,
    pending: PendingState,
) {
    let what = format!("{} to reach ({}, {})", rid, state.as_str(), pending.as_str());
    wait_until(&what, || async {
        composite_state(handle, rid).await == Some((state, pending))
    })
    .await;
}

/// Full testbed: orchestrator, broker and authority in one container, the
/// authority's 10-unit `vm` delegation claimed by the broker.
pub async fn testbed() -> TestBed {
    testbed_with_authority_handler(Arc::new(lattice::adapters::handler::NoopHandler::new())).await
}

pub async fn testbed_with_authority_handler(handler: Arc<dyn ConfigurationHandler>) -> TestBed {
    let bus = Arc::new(MemoryBus::new());
    let config = manual_config();
    let pool = lattice::adapters::sqlite::create_test_pool().await.unwrap();
    let container = Container::with_pool(&config, bus.clone(), pool.clone())
        .await
        .unwrap();
    let clock = container.clock();

    let (orchestrator, orchestrator_stats) = container
        .add_actor(&actor_config(ORCHESTRATOR, ActorRole::Orchestrator))
        .await
        .unwrap();
    let (broker, broker_stats) = container
        .add_actor(&actor_config(BROKER, ActorRole::Broker))
        .await
        .unwrap();
    let (authority, authority_stats) = container
        .add_actor_with_handler(&actor_config(AUTHORITY, ActorRole::Authority), handler)
        .await
        .unwrap();

    let delegation_id = seed_inventory(&authority, &broker).await;

    let slice = Slice::new("s1", orchestrator.identity().clone(), SliceKind::Client);
    let slice_id = orchestrator.register_slice(slice).await.unwrap();

    TestBed {
        bus,
        container,
        pool,
        clock,
        orchestrator,
        orchestrator_stats,
        broker,
        broker_stats,
        authority,
        authority_stats,
        slice_id,
        delegation_id,
    }
}

/// Register the authority's inventory delegation and have the broker claim
/// it; waits until the broker's copy is delegated.
pub async fn seed_inventory(authority: &ActorHandle, broker: &ActorHandle) -> Id {
    let inventory = Slice::new(
        "site-inventory",
        authority.identity().clone(),
        SliceKind::Inventory,
    );
    let inventory_id = authority.register_slice(inventory).await.unwrap();

    let delegation = Delegation::new(
        inventory_id,
        authority.identity().clone(),
        10,
        ResourceType::from("vm"),
    )
    .with_graph(json!({"units": 10, "type": "vm"}));
    let did = authority.register_delegation(delegation).await.unwrap();

    broker
        .claim_delegation(did, AUTHORITY.to_string())
        .await
        .unwrap();
    wait_until("broker delegation claimed", || async {
        broker
            .get_delegation(did)
            .await
            .ok()
            .flatten()
            .is_some_and(|d| d.state == DelegationState::Delegated)
    })
    .await;
    did
}

/// Client reservation for `units` vm units over whole cycles.
pub fn vm_request(bed: &TestBed, units: u64, first_cycle: u64, last_cycle: u64) -> Reservation {
    let term = Term::for_cycles(&bed.clock, first_cycle, last_cycle).unwrap();
    Reservation::client_request(
        bed.slice_id,
        bed.orchestrator.identity().clone(),
        ResourceSet::request(units, ResourceType::from("vm")),
        term,
        BROKER,
    )
}

/// Drive the whole fabric from cycle `from` through `to`.
pub fn tick_range(bed: &TestBed, from: u64, to: u64) {
    for cycle in from..=to {
        bed.container.external_tick(cycle).unwrap();
    }
}

/// Submit, ticket and redeem a 2-unit reservation; returns its id once the
/// lease is active on the orchestrator.
pub async fn active_lease(bed: &TestBed, last_cycle: u64) -> Id {
    let rid = bed
        .orchestrator
        .submit_ticket(vm_request(bed, 2, 5, last_cycle))
        .await
        .unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;
    bed.orchestrator.redeem(rid).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Active, PendingState::None).await;
    rid
}

/// Handler that accepts configuration actions but never completes them
/// until released.
#[derive(Default)]
pub struct StallHandler {
    stalled: Mutex<Vec<ConfigComplete>>,
    sink: Mutex<Option<ActorHandle>>,
}

impl StallHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, handle: ActorHandle) {
        *self.sink.lock().unwrap() = Some(handle);
    }

    pub fn stalled_count(&self) -> usize {
        self.stalled.lock().unwrap().len()
    }

    /// Complete up to `count` stalled actions, oldest first.
    pub fn release(&self, count: usize) {
        let sink = self.sink.lock().unwrap().clone();
        let sink = sink.expect("StallHandler::bind not called");
        let mut stalled = self.stalled.lock().unwrap();
        let take = count.min(stalled.len());
        for completion in stalled.drain(..take) {
            sink.complete(completion);
        }
    }
}

#[async_trait]
impl ConfigurationHandler for StallHandler {
    async fn start(
        &self,
        action: ConfigAction,
        unit: &Unit,
        _sink: &dyn ConfigSink,
    ) -> LatticeResult<()> {
        self.stalled.lock().unwrap().push(ConfigComplete {
            unit_id: unit.id,
            reservation_id: unit.reservation_id,
            action,
            sequence: unit.sequence,
            error: None,
        });
        Ok(())
    }
}
