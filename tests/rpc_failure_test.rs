//! RPC failure propagation: transport timeouts, produce failures, and
//! cancellation when an actor stops. The orchestrator/broker pair and the
//! authority run in separate containers so the redeem path crosses the bus.

mod common;

use std::sync::Arc;

use lattice::adapters::sqlite::create_test_pool;
use lattice::adapters::transport::MemoryBus;
use lattice::domain::models::{
    ActorRole, Id, PendingState, Reservation, ReservationState, ResourceSet, ResourceType, Slice,
    SliceKind, Term,
};
use lattice::services::kernel::ActorHandle;
use lattice::services::Container;

use common::{
    actor_config, manual_config, seed_inventory, testbed_with_authority_handler, wait_for_state,
    wait_until, StallHandler, AUTHORITY, BROKER,
};

struct SplitBed {
    bus: Arc<MemoryBus>,
    edge: Container,
    site: Container,
    orchestrator: ActorHandle,
    slice_id: Id,
    clock: lattice::domain::models::ActorClock,
}

/// Orchestrator and broker in one container, the authority in another, so
/// everything between broker/orchestrator and authority travels the bus.
async fn split_testbed(rpc_timeout_seconds: u64) -> SplitBed {
    let bus = Arc::new(MemoryBus::new());

    let mut edge_config = manual_config();
    edge_config.rpc.timeout_seconds = rpc_timeout_seconds;
    let edge_pool = create_test_pool().await.unwrap();
    let edge = Container::with_pool(&edge_config, bus.clone(), edge_pool)
        .await
        .unwrap();

    let site_config = manual_config();
    let site_pool = create_test_pool().await.unwrap();
    let site = Container::with_pool(&site_config, bus.clone(), site_pool)
        .await
        .unwrap();

    let (orchestrator, _) = edge
        .add_actor(&actor_config(common::ORCHESTRATOR, ActorRole::Orchestrator))
        .await
        .unwrap();
    let (broker, _) = edge
        .add_actor(&actor_config(BROKER, ActorRole::Broker))
        .await
        .unwrap();
    let (authority, _) = site
        .add_actor(&actor_config(AUTHORITY, ActorRole::Authority))
        .await
        .unwrap();

    seed_inventory(&authority, &broker).await;

    let slice = Slice::new("s1", orchestrator.identity().clone(), SliceKind::Client);
    let slice_id = orchestrator.register_slice(slice).await.unwrap();
    let clock = edge.clock();

    SplitBed {
        bus,
        edge,
        site,
        orchestrator,
        slice_id,
        clock,
    }
}

fn request(bed: &SplitBed, units: u64) -> Reservation {
    let term = Term::for_cycles(&bed.clock, 5, 20).unwrap();
    Reservation::client_request(
        bed.slice_id,
        bed.orchestrator.identity().clone(),
        ResourceSet::request(units, ResourceType::from("vm")),
        term,
        BROKER,
    )
}

#[tokio::test]
async fn dropped_redeem_times_out_and_fails_the_reservation() {
    let bed = split_testbed(1).await;

    let rid = bed.orchestrator.submit_ticket(request(&bed, 2)).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;

    // The transport accepts the redeem but loses it before the authority.
    bed.bus.set_drop_filter(|topic, _| topic == AUTHORITY);
    bed.orchestrator.redeem(rid).await.unwrap();

    wait_for_state(&bed.orchestrator, rid, ReservationState::Failed, PendingState::None).await;
    let failed = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert!(
        failed.notices.joined().contains("TransportTimeout"),
        "notice was: {}",
        failed.notices.joined()
    );

    assert_eq!(bed.edge.rpc().pending_count(), 0);
    bed.bus.clear_drop_filter();
    bed.site.stop().await;
    bed.edge.stop().await;
}

#[tokio::test]
async fn refused_produce_reports_transport_failure() {
    let bed = split_testbed(30).await;

    let rid = bed.orchestrator.submit_ticket(request(&bed, 2)).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;

    // The broker outage makes every produce fail outright; the retry window
    // drains before the synthetic failure is delivered.
    bed.bus.set_failing(true);
    bed.orchestrator.redeem(rid).await.unwrap();

    wait_for_state(&bed.orchestrator, rid, ReservationState::Failed, PendingState::None).await;
    let failed = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert!(
        failed.notices.joined().contains("TransportFailure"),
        "notice was: {}",
        failed.notices.joined()
    );

    bed.bus.set_failing(false);
    bed.site.stop().await;
    bed.edge.stop().await;
}

#[tokio::test]
async fn stop_cancels_pending_requests_and_silences_the_actor() {
    let handler = Arc::new(StallHandler::new());
    let bed = testbed_with_authority_handler(handler.clone()).await;
    handler.bind(bed.authority.clone());

    let rid = bed
        .orchestrator
        .submit_ticket(common::vm_request(&bed, 2, 5, 20))
        .await
        .unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;

    // The redeem stalls at the authority, leaving one tracked request.
    bed.orchestrator.redeem(rid).await.unwrap();
    wait_until("redeem tracked", || async {
        bed.container.rpc().pending_count() == 1
    })
    .await;

    bed.orchestrator.stop().await;

    // Cancellation empties the pending table; the stopped actor accepts
    // nothing further.
    wait_until("pending table drained", || async {
        bed.container.rpc().pending_count() == 0
    })
    .await;
    assert!(bed.orchestrator.tick(0).is_err());
    assert!(bed
        .orchestrator
        .get_reservation(rid)
        .await
        .is_err());
}

#[tokio::test]
async fn extend_lease_from_a_stranger_is_rejected() {
    let bed = common::testbed().await;
    let rid = common::active_lease(&bed, 20).await;

    let site_before = bed.authority.get_reservation(rid).await.unwrap().unwrap();

    // Hand-crafted extend from an identity that is not the lease's client.
    let stranger = lattice::domain::models::AuthToken::new("mallory", Id::new());
    let term = site_before.term.unwrap();
    let extended = Term::with_new_start(term.start, term.end + 1, term.end + 10_000).unwrap();
    let wire = lattice::domain::models::ReservationWire {
        rid,
        slice_id: site_before.slice_id,
        slice_name: "s1".into(),
        term: Some(extended),
        rset: None,
        sequence: 99,
        authority: None,
        state: None,
    };
    let envelope = lattice::domain::models::RpcEnvelope::request(
        lattice::domain::models::RpcKind::ExtendLease,
        "mallory",
        stranger,
        lattice::domain::models::RpcPayload::Reservation(wire),
    );
    bed.authority.deliver(envelope).unwrap();

    // The lease is untouched.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let site_after = bed.authority.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(site_after.state, ReservationState::Active);
    assert_eq!(site_after.pending, PendingState::None);
    assert_eq!(site_after.term, site_before.term);
    // The stranger's sequence was not recorded either.
    assert_eq!(site_after.sequences.lease_in, site_before.sequences.lease_in);
}
