//! Client-side reference policy: schedules closes at term end.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::models::{ActorClock, AuthToken, Id, Reservation};
use crate::domain::ports::Policy;

use super::PolicyStats;

/// Orchestrator policy. Tracks each holding's end cycle and reports the
/// reservation for closing one cycle after its term expires; the kernel's
/// expiry sweep converges on the same cycle, so the close is idempotent.
pub struct ClientPolicy {
    clock: ActorClock,
    #[allow(dead_code)]
    stats: Arc<PolicyStats>,
    /// cycle -> reservations scheduled to close at that cycle
    closes: BTreeMap<u64, Vec<Id>>,
    /// latest scheduled close cycle per reservation; an extension moves it
    /// and strands the old calendar entry, which is filtered on firing
    latest: BTreeMap<Id, u64>,
}

impl ClientPolicy {
    pub fn new(clock: ActorClock, stats: Arc<PolicyStats>) -> Self {
        Self {
            clock,
            stats,
            closes: BTreeMap::new(),
            latest: BTreeMap::new(),
        }
    }

    fn schedule_close(&mut self, reservation: &Reservation) {
        let Some(term) = reservation.term.or(reservation.approved_term) else {
            return;
        };
        let close_cycle = term.end_cycle(&self.clock) + 1;
        self.closes.entry(close_cycle).or_default().push(reservation.id);
        self.latest.insert(reservation.id, close_cycle);
        tracing::debug!(rid = %reservation.id, close_cycle, "close scheduled");
    }
}

impl Policy for ClientPolicy {
    fn set_actor(&mut self, identity: &AuthToken) {
        tracing::debug!(actor = %identity.name, "client policy bound");
    }

    fn closing(&mut self, cycle: u64) -> Vec<Id> {
        let due: Vec<u64> = self.closes.range(..=cycle).map(|(c, _)| *c).collect();
        let mut result = Vec::new();
        for c in due {
            if let Some(rids) = self.closes.remove(&c) {
                for rid in rids {
                    // Skip entries stranded by an extension.
                    if self.latest.get(&rid) == Some(&c) {
                        self.latest.remove(&rid);
                        result.push(rid);
                    }
                }
            }
        }
        result
    }

    fn ticket_satisfied(&mut self, reservation: &Reservation) {
        self.schedule_close(reservation);
    }

    fn lease_satisfied(&mut self, reservation: &Reservation) {
        if reservation.is_closed() {
            self.latest.remove(&reservation.id);
            return;
        }
        self.schedule_close(reservation);
    }

    fn revisit(&mut self, reservation: &Reservation) {
        if !reservation.is_terminal() {
            self.schedule_close(reservation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PendingState, ReservationCategory, ReservationState, Term};

    fn active_reservation(term: Term) -> Reservation {
        let mut r = Reservation::new(
            Id::new(),
            ReservationCategory::Client,
            AuthToken::new("orchestrator", Id::new()),
        );
        r.term = Some(term);
        r.transition(ReservationState::Active, PendingState::None);
        r
    }

    #[test]
    fn close_fires_after_term_end() {
        let clock = ActorClock::new(0, 1000, true);
        let mut policy = ClientPolicy::new(clock, Arc::default());
        let term = Term::for_cycles(&clock, 5, 20).unwrap();
        let r = active_reservation(term);
        policy.lease_satisfied(&r);

        assert!(policy.closing(20).is_empty());
        assert_eq!(policy.closing(21), vec![r.id]);
        // one-shot
        assert!(policy.closing(22).is_empty());
    }

    #[test]
    fn extension_strands_old_schedule() {
        let clock = ActorClock::new(0, 1000, true);
        let mut policy = ClientPolicy::new(clock, Arc::default());
        let term = Term::for_cycles(&clock, 5, 20).unwrap();
        let mut r = active_reservation(term);
        policy.lease_satisfied(&r);

        // extended to cycle 40 before the old close fired
        r.term = Some(Term::for_cycles(&clock, 5, 40).unwrap());
        policy.lease_satisfied(&r);

        assert!(policy.closing(21).is_empty());
        assert_eq!(policy.closing(41), vec![r.id]);
    }
}
