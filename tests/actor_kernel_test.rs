//! Kernel surface: lease modification, queries, tick catch-up, and slice
//! unregistration.

mod common;

use std::collections::BTreeMap;

use lattice::domain::errors::LatticeError;
use lattice::domain::models::{PendingState, ReservationState};

use common::{active_lease, testbed, wait_for_state, wait_until, AUTHORITY};

#[tokio::test]
async fn modify_lease_pushes_properties_to_every_unit() {
    let bed = testbed().await;
    let rid = active_lease(&bed, 20).await;

    let mut properties = BTreeMap::new();
    properties.insert("vlan".to_string(), "100".to_string());
    bed.orchestrator.modify_lease(rid, properties).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Active, PendingState::None).await;

    let site = bed.authority.get_reservation(rid).await.unwrap().unwrap();
    let units = site.resources.as_ref().unwrap().unit_set().unwrap();
    assert_eq!(units.len(), 2);
    assert!(units
        .iter()
        .all(|u| u.properties.get("vlan").map(String::as_str) == Some("100")));
    // Each unit ran join then modify.
    assert!(units.iter().all(|u| u.sequence == 2));
}

#[tokio::test]
async fn query_answers_with_actor_status() {
    let bed = testbed().await;

    let mut request = BTreeMap::new();
    request.insert("probe".to_string(), "1".to_string());
    let result = bed
        .container
        .query(bed.orchestrator.identity(), AUTHORITY, request)
        .await
        .unwrap();

    assert_eq!(result.get("name").map(String::as_str), Some(AUTHORITY));
    assert_eq!(result.get("role").map(String::as_str), Some("authority"));
    assert_eq!(result.get("probe").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn out_of_order_ticks_catch_up_through_every_cycle() {
    let bed = testbed().await;

    bed.orchestrator.tick(3).unwrap();
    wait_until("first tick lands", || async {
        bed.orchestrator.current_cycle().await.unwrap() == Some(3)
    })
    .await;

    // Jumping ahead replays cycles 4..=7 in order.
    bed.orchestrator.tick(7).unwrap();
    wait_until("catch-up completes", || async {
        bed.orchestrator.current_cycle().await.unwrap() == Some(7)
    })
    .await;

    // A stale tick is a no-op.
    bed.orchestrator.tick(5).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(bed.orchestrator.current_cycle().await.unwrap(), Some(7));
}

#[tokio::test]
async fn slices_unregister_only_after_their_reservations_are_terminal() {
    let bed = testbed().await;
    let rid = active_lease(&bed, 20).await;

    let error = bed.orchestrator.unregister_slice(bed.slice_id).await.unwrap_err();
    assert!(matches!(error, LatticeError::InvalidSlice(_)));

    bed.orchestrator.close(rid).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Closed, PendingState::None).await;

    bed.orchestrator.unregister_slice(bed.slice_id).await.unwrap();
    assert!(bed.orchestrator.get_slice(bed.slice_id).await.unwrap().is_none());
    assert!(bed.orchestrator.get_reservation(rid).await.unwrap().is_none());
}
