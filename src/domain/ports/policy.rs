//! Policy port: the pluggable allocation brain of an actor.
//!
//! The kernel owns the state machines and invokes the policy at defined
//! hooks; the policy owns calendars and inventory accounting. Reservations
//! are always passed by argument, never stored by the policy (only ids may
//! be retained), which keeps ownership acyclic.

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{AuthToken, Delegation, Id, Reservation, Term, Ticket, UnitSet};

/// Hook surface invoked by the actor kernel.
///
/// Default implementations make every hook optional so a policy only
/// implements the hooks its role uses; allocation hooks invoked on the
/// wrong role report an internal error rather than panicking.
pub trait Policy: Send {
    /// Bind the owning actor's identity. Called once during initialize.
    fn set_actor(&mut self, identity: &AuthToken);

    /// Start-of-cycle hook.
    fn prepare(&mut self, _cycle: u64) {}

    /// End-of-cycle hook.
    fn finish(&mut self, _cycle: u64) {}

    /// Reservations due to close at this cycle (expired holdings).
    fn closing(&mut self, _cycle: u64) -> Vec<Id> {
        Vec::new()
    }

    // --- client hooks -----------------------------------------------------

    /// A ticket update was accepted; the policy may schedule the close.
    fn ticket_satisfied(&mut self, _reservation: &Reservation) {}

    /// A lease update was accepted.
    fn lease_satisfied(&mut self, _reservation: &Reservation) {}

    // --- broker hooks -----------------------------------------------------

    /// Allocate a ticket for a requested reservation out of claimed
    /// inventory.
    fn allocate(&mut self, _reservation: &Reservation, _cycle: u64) -> LatticeResult<Ticket> {
        Err(LatticeError::InternalError("policy does not allocate tickets".into()))
    }

    /// Allocate the extension of an existing ticket.
    fn extend_allocation(&mut self, _reservation: &Reservation) -> LatticeResult<Ticket> {
        Err(LatticeError::InternalError("policy does not extend tickets".into()))
    }

    /// Return a closed or relinquished reservation's holding to inventory.
    fn release(&mut self, _reservation: &Reservation) {}

    /// Inventory arrived through a claimed delegation.
    fn donate_delegation(&mut self, _delegation: &Delegation) {}

    /// A delegation was reclaimed by its owner.
    fn reclaim_delegation(&mut self, _delegation: &Delegation) {}

    /// Units still allocatable against a delegation over the given term.
    fn available_units(&self, _delegation_id: &Id, _term: &Term) -> u64 {
        0
    }

    // --- authority hooks --------------------------------------------------

    /// Mint the unit set for a redeemed ticket.
    fn assign(&mut self, _reservation: &Reservation) -> LatticeResult<UnitSet> {
        Err(LatticeError::InternalError("policy does not assign units".into()))
    }

    /// Plan a lease extension: returns the ids of units that require a
    /// modify action under the new term.
    fn extend_lease(&mut self, _reservation: &Reservation, _new_term: &Term) -> LatticeResult<Vec<Id>> {
        Err(LatticeError::InternalError("policy does not extend leases".into()))
    }

    /// Capacity freed by a closed reservation.
    fn freed(&mut self, _units: u64, _reservation: &Reservation) {}

    // --- recovery hooks ---------------------------------------------------

    fn recovery_starting(&mut self) {}

    /// Rebuild calendars/accounting for a recovered reservation.
    fn revisit(&mut self, _reservation: &Reservation) {}

    /// Rebuild accounting for a recovered delegation.
    fn revisit_delegation(&mut self, _delegation: &Delegation) {}

    fn recovery_ended(&mut self) {}
}
