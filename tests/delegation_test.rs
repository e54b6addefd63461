//! Delegation claim/reclaim between authority and broker.

mod common;

use std::sync::atomic::Ordering;

use lattice::domain::models::{DelegationState, Id, PendingState, ReservationState};

use common::{testbed, vm_request, wait_for_state, wait_until, AUTHORITY};

#[tokio::test]
async fn claimed_delegation_donates_allocatable_inventory() {
    let bed = testbed().await;

    // The harness already claimed the 10-unit delegation.
    let broker_copy = bed.broker.get_delegation(bed.delegation_id).await.unwrap().unwrap();
    assert_eq!(broker_copy.state, DelegationState::Delegated);
    assert_eq!(broker_copy.units, 10);
    assert!(broker_copy.graph.is_some());
    assert_eq!(broker_copy.owner.name, AUTHORITY);

    let site_copy = bed.authority.get_delegation(bed.delegation_id).await.unwrap().unwrap();
    assert_eq!(site_copy.state, DelegationState::Delegated);
    assert_eq!(site_copy.holder.as_ref().map(|h| h.name.as_str()), Some("broker"));

    assert_eq!(bed.broker_stats.allocatable.load(Ordering::Relaxed), 10);
}

#[tokio::test]
async fn reclaim_returns_inventory_to_the_authority() {
    let bed = testbed().await;

    bed.broker.reclaim_delegation(bed.delegation_id).await.unwrap();
    wait_until("delegation reclaimed on both sides", || async {
        let broker_state = bed
            .broker
            .get_delegation(bed.delegation_id)
            .await
            .ok()
            .flatten()
            .map(|d| d.state);
        let site_state = bed
            .authority
            .get_delegation(bed.delegation_id)
            .await
            .ok()
            .flatten()
            .map(|d| d.state);
        broker_state == Some(DelegationState::Reclaimed)
            && site_state == Some(DelegationState::Reclaimed)
    })
    .await;
    assert_eq!(bed.broker_stats.allocatable.load(Ordering::Relaxed), 0);

    // With the inventory gone, new tickets fail at allocation.
    let rid = bed
        .orchestrator
        .submit_ticket(vm_request(&bed, 2, 5, 20))
        .await
        .unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Failed, PendingState::None).await;
    let failed = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert!(!failed.notices.is_empty());
}

#[tokio::test]
async fn claiming_an_unknown_delegation_fails_the_local_record() {
    let bed = testbed().await;

    let bogus = Id::new();
    bed.broker
        .claim_delegation(bogus, AUTHORITY.to_string())
        .await
        .unwrap();
    wait_until("claim rejected", || async {
        bed.broker
            .get_delegation(bogus)
            .await
            .ok()
            .flatten()
            .is_some_and(|d| d.state == DelegationState::Failed)
    })
    .await;
}
