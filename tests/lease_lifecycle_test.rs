//! End-to-end lease lifecycle: ticket, redeem, extend, pending-operation
//! gating, and expiry close across the three roles.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use lattice::domain::errors::LatticeError;
use lattice::domain::models::{
    PendingState, Reservation, ReservationState, ResourceSet, ResourceType, Term, UnitState,
};

use common::{
    active_lease, testbed, testbed_with_authority_handler, tick_range, vm_request, wait_for_state,
    wait_until, StallHandler,
};

#[tokio::test]
async fn happy_path_lease_activates_and_closes_at_expiry() {
    let bed = testbed().await;

    // Submit: 2 units of vm over cycles [5, 20].
    let rid = bed
        .orchestrator
        .submit_ticket(vm_request(&bed, 2, 5, 20))
        .await
        .unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;

    let ticketed = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(ticketed.authority.as_deref(), Some(common::AUTHORITY));
    assert!(ticketed.resources.as_ref().unwrap().ticket().is_some());

    bed.orchestrator.redeem(rid).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Active, PendingState::None).await;

    // Invariant: the client's unit count equals the authority's active units.
    let client_side = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(client_side.unit_count(), 2);
    let site_side = bed.authority.get_reservation(rid).await.unwrap().unwrap();
    let units = site_side.resources.as_ref().unwrap().unit_set().unwrap();
    assert_eq!(units.active_count(), 2);
    assert!(units.iter().all(|u| u.state == UnitState::Active));

    // The term expires after cycle 20; cycle 21 closes both sides.
    tick_range(&bed, 0, 21);
    wait_for_state(&bed.orchestrator, rid, ReservationState::Closed, PendingState::None).await;
    wait_for_state(&bed.authority, rid, ReservationState::Closed, PendingState::None).await;

    wait_until("authority frees the units", || async {
        bed.authority_stats.freed.load(Ordering::Relaxed) == 2
    })
    .await;
}

#[tokio::test]
async fn extension_moves_term_without_duplicating_units() {
    let bed = testbed().await;
    let rid = active_lease(&bed, 20).await;
    tick_range(&bed, 0, 15);

    // Extend the ticket to cycle 40, then the lease.
    let current = bed
        .orchestrator
        .get_reservation(rid)
        .await
        .unwrap()
        .unwrap()
        .term
        .unwrap();
    let extended = Term::with_new_start(
        current.start,
        current.end + 1,
        bed.clock.cycle_end_millis(40),
    )
    .unwrap();

    bed.orchestrator.extend_ticket(rid, extended).await.unwrap();
    wait_for_state(
        &bed.orchestrator,
        rid,
        ReservationState::ActiveTicketed,
        PendingState::None,
    )
    .await;

    bed.orchestrator.extend_lease(rid).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Active, PendingState::None).await;

    let client_side = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(client_side.term.unwrap().end, bed.clock.cycle_end_millis(40));
    assert_eq!(client_side.term.unwrap().start, current.start);
    assert_eq!(client_side.unit_count(), 2);

    // One logical reservation, still exactly two units at the authority.
    let site_side = bed.authority.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(site_side.term.unwrap().end, bed.clock.cycle_end_millis(40));
    let units = site_side.resources.as_ref().unwrap().unit_set().unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units.active_count(), 2);

    // Not closed at the old expiry.
    tick_range(&bed, 16, 25);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let still_active = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(still_active.state, ReservationState::Active);

    // Closed after the new expiry.
    tick_range(&bed, 26, 41);
    wait_for_state(&bed.orchestrator, rid, ReservationState::Closed, PendingState::None).await;
}

#[tokio::test]
async fn operations_are_rejected_while_another_is_pending() {
    let handler = Arc::new(StallHandler::new());
    let bed = testbed_with_authority_handler(handler.clone()).await;
    handler.bind(bed.authority.clone());

    let rid = bed
        .orchestrator
        .submit_ticket(vm_request(&bed, 2, 5, 20))
        .await
        .unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;

    // Redeem stalls in the authority's configuration handler, so the client
    // stays (Ticketed, Redeeming).
    bed.orchestrator.redeem(rid).await.unwrap();
    wait_until("joins dispatched", || async { handler.stalled_count() == 2 }).await;
    assert_eq!(
        common::composite_state(&bed.orchestrator, rid).await,
        Some((ReservationState::Ticketed, PendingState::Redeeming))
    );

    // A close during the pending redeem is rejected synchronously and
    // leaves the state machine untouched.
    let error = bed.orchestrator.close(rid).await.unwrap_err();
    assert!(matches!(error, LatticeError::ReservationHasPendingOperation(_)));
    assert_eq!(
        common::composite_state(&bed.orchestrator, rid).await,
        Some((ReservationState::Ticketed, PendingState::Redeeming))
    );

    // The stalled operation then completes normally.
    handler.release(2);
    wait_for_state(&bed.orchestrator, rid, ReservationState::Active, PendingState::None).await;
    let client_side = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(client_side.unit_count(), 2);
}

#[tokio::test]
async fn close_during_ticketing_closes_locally_without_an_rpc() {
    let bed = testbed().await;

    // A broker topic nobody serves keeps the ticket request unanswered, so
    // the reservation stays mid-ticketing.
    let term = Term::for_cycles(&bed.clock, 5, 20).unwrap();
    let request = Reservation::client_request(
        bed.slice_id,
        bed.orchestrator.identity().clone(),
        ResourceSet::request(1, ResourceType::from("vm")),
        term,
        "nowhere",
    );
    let rid = bed.orchestrator.submit_ticket(request).await.unwrap();
    wait_until("reservation mid-ticketing", || async {
        common::composite_state(&bed.orchestrator, rid).await
            == Some((ReservationState::Nascent, PendingState::Ticketing))
    })
    .await;

    // Nothing was granted yet: the close is accepted and resolves locally.
    bed.orchestrator.close(rid).await.unwrap();
    assert_eq!(
        common::composite_state(&bed.orchestrator, rid).await,
        Some((ReservationState::Closed, PendingState::None))
    );
}

#[tokio::test]
async fn close_of_unknown_reservation_reports_no_such_reservation() {
    let bed = testbed().await;
    let error = bed
        .orchestrator
        .close(lattice::domain::models::Id::new())
        .await
        .unwrap_err();
    assert!(matches!(error, LatticeError::NoSuchReservation(_)));
}

#[tokio::test]
async fn invalid_extension_is_rejected_and_state_unchanged() {
    let bed = testbed().await;
    let rid = active_lease(&bed, 20).await;

    // Overlapping term: new_start does not pass the current end.
    let current = bed
        .orchestrator
        .get_reservation(rid)
        .await
        .unwrap()
        .unwrap()
        .term
        .unwrap();
    let overlapping = Term::with_new_start(current.start, current.end - 500, current.end + 5000)
        .unwrap();
    let error = bed
        .orchestrator
        .extend_ticket(rid, overlapping)
        .await
        .unwrap_err();
    assert!(matches!(error, LatticeError::InvalidExtend(_)));

    assert_eq!(
        common::composite_state(&bed.orchestrator, rid).await,
        Some((ReservationState::Active, PendingState::None))
    );
    let unchanged = bed.orchestrator.get_reservation(rid).await.unwrap().unwrap();
    assert_eq!(unchanged.term.unwrap(), current);
}

#[tokio::test]
async fn closing_a_bare_ticket_relinquishes_to_the_broker() {
    let bed = testbed().await;
    let rid = bed
        .orchestrator
        .submit_ticket(vm_request(&bed, 4, 5, 20))
        .await
        .unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Ticketed, PendingState::None).await;
    wait_until("broker holds the allocation", || async {
        bed.broker_stats.allocatable.load(Ordering::Relaxed) == 6
    })
    .await;

    bed.orchestrator.close(rid).await.unwrap();
    wait_for_state(&bed.orchestrator, rid, ReservationState::Closed, PendingState::None).await;
    wait_until("broker releases the allocation", || async {
        bed.broker_stats.allocatable.load(Ordering::Relaxed) == 10
    })
    .await;
    wait_for_state(&bed.broker, rid, ReservationState::Closed, PendingState::None).await;
}
