//! Broker-side reference policy: inventory accounting over claimed
//! delegations with first-fit ticket allocation.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    ActorClock, AuthToken, Delegation, Id, Reservation, ResourceType, Term, Ticket,
};
use crate::domain::ports::Policy;

use super::PolicyStats;

struct Holding {
    units: u64,
    term: Term,
    delegation_id: Id,
}

struct Inventory {
    units: u64,
    rtype: ResourceType,
}

/// Broker policy. Every ticket draws on one claimed delegation; a ticket is
/// only issued while `units <= available_units(delegation, term)`.
pub struct InventoryPolicy {
    clock: ActorClock,
    stats: Arc<PolicyStats>,
    delegations: BTreeMap<Id, Inventory>,
    /// rid -> current holding
    holdings: BTreeMap<Id, Holding>,
    /// cycle -> reservations whose allocation ends at that cycle
    expiries: BTreeMap<u64, Vec<Id>>,
}

impl InventoryPolicy {
    pub fn new(clock: ActorClock, stats: Arc<PolicyStats>) -> Self {
        Self {
            clock,
            stats,
            delegations: BTreeMap::new(),
            holdings: BTreeMap::new(),
            expiries: BTreeMap::new(),
        }
    }

    fn available(&self, delegation_id: &Id, term: &Term) -> u64 {
        let Some(inventory) = self.delegations.get(delegation_id) else {
            return 0;
        };
        let held: u64 = self
            .holdings
            .values()
            .filter(|h| h.delegation_id == *delegation_id)
            .filter(|h| h.term.start <= term.end && term.start <= h.term.end)
            .map(|h| h.units)
            .sum();
        inventory.units.saturating_sub(held)
    }

    fn refresh_allocatable(&self) {
        let total: u64 = self.delegations.values().map(|i| i.units).sum();
        let held: u64 = self.holdings.values().map(|h| h.units).sum();
        self.stats
            .allocatable
            .store(total.saturating_sub(held), Ordering::Relaxed);
    }

    fn record_holding(&mut self, rid: Id, units: u64, term: Term, delegation_id: Id) {
        self.holdings.insert(rid, Holding { units, term, delegation_id });
        let expiry = term.end_cycle(&self.clock) + 1;
        self.expiries.entry(expiry).or_default().push(rid);
        self.refresh_allocatable();
    }
}

impl Policy for InventoryPolicy {
    fn set_actor(&mut self, identity: &AuthToken) {
        tracing::debug!(actor = %identity.name, "inventory policy bound");
    }

    fn closing(&mut self, cycle: u64) -> Vec<Id> {
        let due: Vec<u64> = self.expiries.range(..=cycle).map(|(c, _)| *c).collect();
        let mut result = Vec::new();
        for c in due {
            if let Some(rids) = self.expiries.remove(&c) {
                for rid in rids {
                    // Extensions moved the holding past this expiry.
                    if let Some(holding) = self.holdings.get(&rid) {
                        if holding.term.end_cycle(&self.clock) + 1 <= cycle {
                            result.push(rid);
                        }
                    }
                }
            }
        }
        result
    }

    fn allocate(&mut self, reservation: &Reservation, cycle: u64) -> LatticeResult<Ticket> {
        let requested = reservation
            .requested_resources
            .as_ref()
            .ok_or_else(|| LatticeError::InvalidArguments("no requested resources".into()))?;
        let term = reservation
            .requested_term
            .ok_or_else(|| LatticeError::InvalidArguments("no requested term".into()))?;
        let holder = reservation
            .client
            .as_ref()
            .map_or(reservation.owner.guid, |c| c.guid);

        let candidate = self
            .delegations
            .iter()
            .find(|(did, inventory)| {
                inventory.rtype == requested.rtype && self.available(did, &term) >= requested.units
            })
            .map(|(did, _)| *did);

        let Some(delegation_id) = candidate else {
            return Err(LatticeError::InvalidReservation(format!(
                "insufficient {} inventory for {} unit(s) at cycle {cycle}",
                requested.rtype, requested.units
            )));
        };

        let ticket = Ticket::new(term, requested.units, requested.rtype.clone(), holder, delegation_id);
        self.record_holding(reservation.id, requested.units, term, delegation_id);
        tracing::info!(
            rid = %reservation.id,
            units = requested.units,
            rtype = %requested.rtype,
            delegation = %delegation_id,
            "ticket allocated"
        );
        Ok(ticket)
    }

    fn extend_allocation(&mut self, reservation: &Reservation) -> LatticeResult<Ticket> {
        let term = reservation
            .requested_term
            .ok_or_else(|| LatticeError::InvalidArguments("no requested term".into()))?;
        let current = reservation
            .resources
            .as_ref()
            .and_then(|r| r.ticket())
            .ok_or_else(|| LatticeError::InvalidReservation("no ticket to extend".into()))?;

        let holding = self
            .holdings
            .get(&reservation.id)
            .ok_or_else(|| LatticeError::NoSuchReservation(reservation.id))?;
        let delegation_id = holding.delegation_id;
        let units = holding.units;

        // The holding itself does not count against the extension window.
        let held_elsewhere: u64 = self
            .holdings
            .iter()
            .filter(|(rid, _)| **rid != reservation.id)
            .map(|(_, h)| h)
            .filter(|h| h.delegation_id == delegation_id)
            .filter(|h| h.term.start <= term.end && term.start <= h.term.end)
            .map(|h| h.units)
            .sum();
        let total = self.delegations.get(&delegation_id).map_or(0, |i| i.units);
        if units > total.saturating_sub(held_elsewhere) {
            return Err(LatticeError::InvalidReservation(format!(
                "insufficient inventory to extend {}",
                reservation.id
            )));
        }

        let ticket = current.extend(term, units);
        self.record_holding(reservation.id, units, term, delegation_id);
        tracing::info!(rid = %reservation.id, "ticket extension allocated");
        Ok(ticket)
    }

    fn release(&mut self, reservation: &Reservation) {
        if self.holdings.remove(&reservation.id).is_some() {
            tracing::info!(rid = %reservation.id, "holding released");
            self.refresh_allocatable();
        }
    }

    fn donate_delegation(&mut self, delegation: &Delegation) {
        self.delegations.insert(
            delegation.id,
            Inventory {
                units: delegation.units,
                rtype: delegation.rtype.clone(),
            },
        );
        tracing::info!(
            did = %delegation.id,
            units = delegation.units,
            rtype = %delegation.rtype,
            "inventory donated"
        );
        self.refresh_allocatable();
    }

    fn reclaim_delegation(&mut self, delegation: &Delegation) {
        self.delegations.remove(&delegation.id);
        tracing::info!(did = %delegation.id, "inventory reclaimed");
        self.refresh_allocatable();
    }

    fn available_units(&self, delegation_id: &Id, term: &Term) -> u64 {
        self.available(delegation_id, term)
    }

    fn revisit(&mut self, reservation: &Reservation) {
        // Rebuild holdings for recovered, still-ticketed reservations.
        if reservation.is_terminal() {
            return;
        }
        let Some(ticket) = reservation.resources.as_ref().and_then(|r| r.ticket()) else {
            return;
        };
        self.record_holding(reservation.id, ticket.units, ticket.term, ticket.delegation_id);
    }

    fn revisit_delegation(&mut self, delegation: &Delegation) {
        if delegation.state == crate::domain::models::DelegationState::Delegated {
            self.donate_delegation(delegation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ReservationCategory, ResourceSet};

    fn broker_policy(units: u64) -> (InventoryPolicy, Id) {
        let clock = ActorClock::new(0, 1000, true);
        let mut policy = InventoryPolicy::new(clock, Arc::default());
        let delegation = Delegation::new(
            Id::new(),
            AuthToken::new("authority", Id::new()),
            units,
            ResourceType::from("vm"),
        );
        policy.donate_delegation(&delegation);
        (policy, delegation.id)
    }

    fn request(units: u64, term: Term) -> Reservation {
        let mut r = Reservation::new(
            Id::new(),
            ReservationCategory::Broker,
            AuthToken::new("broker", Id::new()),
        );
        r.requested_resources = Some(ResourceSet::request(units, ResourceType::from("vm")));
        r.requested_term = Some(term);
        r.client = Some(AuthToken::new("orchestrator", Id::new()));
        r
    }

    #[test]
    fn tickets_never_exceed_availability() {
        let (mut policy, did) = broker_policy(10);
        let term = Term::new(0, 9999).unwrap();

        let r1 = request(6, term);
        let t1 = policy.allocate(&r1, 0).unwrap();
        assert_eq!(t1.units, 6);
        assert_eq!(policy.available_units(&did, &term), 4);

        let r2 = request(6, term);
        assert!(policy.allocate(&r2, 0).is_err());

        let r3 = request(4, term);
        assert!(policy.allocate(&r3, 0).is_ok());
        assert_eq!(policy.available_units(&did, &term), 0);
    }

    #[test]
    fn disjoint_terms_share_inventory() {
        let (mut policy, did) = broker_policy(10);
        let early = Term::new(0, 999).unwrap();
        let late = Term::new(2000, 2999).unwrap();

        let r1 = request(10, early);
        policy.allocate(&r1, 0).unwrap();
        assert_eq!(policy.available_units(&did, &late), 10);
        let r2 = request(10, late);
        assert!(policy.allocate(&r2, 0).is_ok());
    }

    #[test]
    fn release_returns_inventory() {
        let (mut policy, did) = broker_policy(10);
        let term = Term::new(0, 999).unwrap();
        let r = request(10, term);
        policy.allocate(&r, 0).unwrap();
        assert_eq!(policy.available_units(&did, &term), 0);
        policy.release(&r);
        assert_eq!(policy.available_units(&did, &term), 10);
    }

    #[test]
    fn extension_does_not_double_count_own_holding() {
        let (mut policy, _did) = broker_policy(10);
        let term = Term::new(0, 999).unwrap();
        let mut r = request(10, term);
        let ticket = policy.allocate(&r, 0).unwrap();
        r.resources = Some(ResourceSet::with_ticket(ticket));
        r.requested_term = Some(term.extend());
        let extended = policy.extend_allocation(&r).unwrap();
        assert_eq!(extended.units, 10);
        assert!(extended.source.is_some());
    }
}
