//! Store contracts: blob round-trip identity, duplicate-unit rejection,
//! and the per-entity query paths.

mod common;

use lattice::adapters::sqlite::{create_test_pool, run_migrations, stores_for_actor};
use lattice::domain::models::{
    AuthToken, Delegation, Id, PendingState, Reservation, ReservationCategory, ReservationState,
    ResourceSet, ResourceType, Slice, SliceKind, Term, Unit,
};

async fn fresh_stores() -> (lattice::domain::ports::Stores, Id) {
    let pool = create_test_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();
    let actor_id = Id::new();
    (stores_for_actor(&pool, actor_id), actor_id)
}

fn sample_reservation(owner: &AuthToken) -> Reservation {
    let term = Term::new(5000, 20_999).unwrap();
    let mut reservation = Reservation::client_request(
        Id::new(),
        owner.clone(),
        ResourceSet::request(2, ResourceType::from("vm")),
        term,
        "broker",
    );
    reservation.transition(ReservationState::Nascent, PendingState::Ticketing);
    reservation.notices.add("submitted");
    reservation
}

#[tokio::test]
async fn unmutated_reservation_round_trips_byte_identical() {
    let (stores, actor_id) = fresh_stores().await;
    let owner = AuthToken::new("orchestrator", Id::new());
    let reservation = sample_reservation(&owner);

    stores.add_reservation(&reservation).await.unwrap();

    let blob = stores
        .reservations
        .get_reservation_blob(actor_id, reservation.id)
        .await
        .unwrap()
        .unwrap();
    let decoded = stores
        .reservations
        .get_reservation(actor_id, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decoded.state, reservation.state);
    assert_eq!(decoded.pending, reservation.pending);
    assert_eq!(decoded.term, reservation.term);

    // No mutation: serializing the decoded copy reproduces the stored blob
    // exactly.
    let reserialized = serde_json::to_string(&decoded).unwrap();
    assert_eq!(reserialized, blob);
}

#[tokio::test]
async fn duplicate_unit_ids_are_rejected_outside_recovery() {
    let (stores, _actor_id) = fresh_stores().await;
    let unit = Unit::new(Id::new(), Id::new(), Id::new(), ResourceType::from("vm"));

    stores.add_unit(&unit, false).await.unwrap();
    let error = stores.add_unit(&unit, false).await.unwrap_err();
    assert!(error.to_string().contains("already exists"), "got: {error}");

    // The recovery path re-inserts the surviving row.
    stores.add_unit(&unit, true).await.unwrap();
}

#[tokio::test]
async fn slices_are_queryable_by_kind_and_resource_type() {
    let (stores, actor_id) = fresh_stores().await;
    let owner = AuthToken::new("site", Id::new());

    let inventory = Slice::new("inv", owner.clone(), SliceKind::Inventory)
        .with_resource_type(ResourceType::from("vm"));
    let client = Slice::new("c1", owner.clone(), SliceKind::BrokerClient);
    stores.add_slice(&inventory).await.unwrap();
    stores.add_slice(&client).await.unwrap();

    let inventories = stores.get_slices_by_kind(SliceKind::Inventory).await.unwrap();
    assert_eq!(inventories.len(), 1);
    assert_eq!(inventories[0].name, "inv");

    let by_type = stores
        .slices
        .get_slices_by_resource_type(actor_id, &ResourceType::from("vm"))
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);

    let all = stores.slices.get_slices(actor_id).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn reservations_are_queryable_by_state_and_category() {
    let (stores, actor_id) = fresh_stores().await;
    let owner = AuthToken::new("orchestrator", Id::new());

    let mut ticketing = sample_reservation(&owner);
    let mut failed = sample_reservation(&owner);
    failed.fail("broker unreachable");
    stores.add_reservation(&ticketing).await.unwrap();
    stores.add_reservation(&failed).await.unwrap();

    let by_state = stores
        .reservations
        .get_reservations_by_state(actor_id, ReservationState::Failed)
        .await
        .unwrap();
    assert_eq!(by_state.len(), 1);
    assert_eq!(by_state[0].id, failed.id);

    let by_category = stores
        .reservations
        .get_reservations_by_category(actor_id, ReservationCategory::Client)
        .await
        .unwrap();
    assert_eq!(by_category.len(), 2);

    // Updates are atomic per entity: the stored row reflects the latest
    // transition.
    ticketing.transition(ReservationState::Ticketed, PendingState::None);
    stores.update_reservation(&ticketing).await.unwrap();
    let reloaded = stores
        .reservations
        .get_reservation(actor_id, ticketing.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.state, ReservationState::Ticketed);
}

#[tokio::test]
async fn delegations_round_trip_with_graph() {
    let (stores, actor_id) = fresh_stores().await;
    let owner = AuthToken::new("site", Id::new());
    let slice_id = Id::new();

    let delegation = Delegation::new(slice_id, owner, 10, ResourceType::from("vm"))
        .with_graph(serde_json::json!({"nodes": ["a", "b"], "units": 10}));
    stores.add_delegation(&delegation).await.unwrap();

    let by_slice = stores.get_delegations_by_slice(slice_id).await.unwrap();
    assert_eq!(by_slice.len(), 1);
    assert_eq!(by_slice[0].graph, delegation.graph);
    assert_eq!(by_slice[0].units, 10);

    let fetched = stores
        .delegations
        .get_delegation(actor_id, delegation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched, delegation);
}
