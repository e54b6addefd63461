//! Authority-side reference policy: mints units for redeemed tickets.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{AuthToken, Id, Reservation, Term, Unit, UnitSet};
use crate::domain::ports::Policy;

use super::PolicyStats;

/// Authority policy. Unit assignment is one fresh unit per ticketed unit;
/// a plain time extension reuses the existing units unmodified.
pub struct AssignmentPolicy {
    stats: Arc<PolicyStats>,
    actor: Option<AuthToken>,
    /// When set, lease extensions require a modify action on every unit
    /// (substrates where the end date is part of unit configuration).
    modify_on_extend: bool,
}

impl AssignmentPolicy {
    pub fn new(stats: Arc<PolicyStats>) -> Self {
        Self {
            stats,
            actor: None,
            modify_on_extend: false,
        }
    }

    pub fn with_modify_on_extend(mut self) -> Self {
        self.modify_on_extend = true;
        self
    }
}

impl Policy for AssignmentPolicy {
    fn set_actor(&mut self, identity: &AuthToken) {
        self.actor = Some(identity.clone());
    }

    fn assign(&mut self, reservation: &Reservation) -> LatticeResult<UnitSet> {
        let ticket = reservation
            .requested_resources
            .as_ref()
            .and_then(|r| r.ticket())
            .ok_or_else(|| LatticeError::InvalidReservation("redeem carries no ticket".into()))?;
        let actor_id = self
            .actor
            .as_ref()
            .map(|a| a.guid)
            .ok_or_else(|| LatticeError::InvalidActor("policy not bound to an actor".into()))?;

        let mut units = UnitSet::new();
        for _ in 0..ticket.units {
            let mut unit = Unit::new(
                reservation.id,
                reservation.slice_id,
                actor_id,
                ticket.rtype.clone(),
            );
            for (key, value) in &ticket.properties {
                unit.set_property(key.clone(), value.clone());
            }
            units.add(unit);
        }
        self.stats.assigned.fetch_add(ticket.units, Ordering::Relaxed);
        tracing::info!(rid = %reservation.id, units = ticket.units, "units assigned");
        Ok(units)
    }

    fn extend_lease(&mut self, reservation: &Reservation, _new_term: &Term) -> LatticeResult<Vec<Id>> {
        if !self.modify_on_extend {
            return Ok(Vec::new());
        }
        let ids = reservation
            .resources
            .as_ref()
            .and_then(|r| r.unit_set())
            .map(|units| units.iter().map(|u| u.id).collect())
            .unwrap_or_default();
        Ok(ids)
    }

    fn freed(&mut self, units: u64, reservation: &Reservation) {
        self.stats.freed.fetch_add(units, Ordering::Relaxed);
        tracing::info!(rid = %reservation.id, units, "units freed");
    }

    fn revisit(&mut self, reservation: &Reservation) {
        if let Some(units) = reservation.resources.as_ref().and_then(|r| r.unit_set()) {
            self.stats
                .assigned
                .fetch_add(units.len() as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ReservationCategory, ResourceSet, ResourceType, Ticket, UnitState,
    };

    fn redeem_reservation(units: u64) -> Reservation {
        let term = Term::new(0, 999).unwrap();
        let ticket = Ticket::new(term, units, ResourceType::from("vm"), Id::new(), Id::new());
        let mut r = Reservation::new(
            Id::new(),
            ReservationCategory::Authority,
            AuthToken::new("authority", Id::new()),
        );
        r.requested_resources = Some(ResourceSet::with_ticket(ticket));
        r.requested_term = Some(term);
        r
    }

    #[test]
    fn assign_mints_one_unit_per_ticketed_unit() {
        let stats: Arc<PolicyStats> = Arc::default();
        let mut policy = AssignmentPolicy::new(stats.clone());
        policy.set_actor(&AuthToken::new("authority", Id::new()));

        let r = redeem_reservation(3);
        let units = policy.assign(&r).unwrap();
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|u| u.state == UnitState::Default));
        assert!(units.iter().all(|u| u.reservation_id == r.id));
        assert_eq!(stats.assigned.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn assign_requires_bound_actor() {
        let mut policy = AssignmentPolicy::new(Arc::default());
        let r = redeem_reservation(1);
        assert!(policy.assign(&r).is_err());
    }

    #[test]
    fn plain_extension_touches_no_units() {
        let mut policy = AssignmentPolicy::new(Arc::default());
        policy.set_actor(&AuthToken::new("authority", Id::new()));
        let r = redeem_reservation(2);
        let term = Term::new(0, 999).unwrap().extend();
        assert!(policy.extend_lease(&r, &term).unwrap().is_empty());
    }
}
