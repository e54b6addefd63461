//! Recovery: re-hydrate slices, reservations and delegations from the
//! store, restart in-flight configuration actions, and defer protocol
//! operations to the first post-recovery tick.

use crate::domain::errors::LatticeResult;
use crate::domain::models::{
    ConfigAction, Delegation, Id, PendingState, Reservation, ReservationCategory, Slice, SliceKind,
    UnitState,
};

use super::actor::{Actor, StagedConfig};

impl Actor {
    /// Rebuild kernel state from persistent storage. Runs once, before the
    /// first event is processed.
    pub(crate) async fn recover(&mut self) -> LatticeResult<()> {
        tracing::info!(actor = %self.identity.name, "starting recovery");
        self.policy.recovery_starting();

        // Inventory first so claimed delegations are known before the
        // client-side work that depends on them.
        let mut slices = self.stores.get_slices_by_kind(SliceKind::Inventory).await?;
        slices.extend(self.stores.get_slices_by_kind(SliceKind::BrokerClient).await?);
        slices.extend(self.stores.get_slices_by_kind(SliceKind::Client).await?);
        tracing::debug!(actor = %self.identity.name, count = slices.len(), "recovering slices");

        for slice in slices {
            if let Err(error) = self.recover_slice(slice).await {
                tracing::error!(actor = %self.identity.name, %error, "slice recovery failed");
            }
        }

        self.recovered = true;
        self.policy.recovery_ended();
        tracing::info!(actor = %self.identity.name, "recovery complete");
        Ok(())
    }

    async fn recover_slice(&mut self, slice: Slice) -> LatticeResult<()> {
        let slice_id = slice.id;
        if self.slices.contains_key(&slice_id) {
            return Ok(());
        }
        tracing::info!(actor = %self.identity.name, slice = %slice_id, name = %slice.name, "recovering slice");
        self.re_register_slice(slice);

        let reservations = self.stores.get_reservations_by_slice(slice_id).await?;
        for reservation in reservations {
            self.recover_reservation(reservation);
        }

        let delegations = self.stores.get_delegations_by_slice(slice_id).await?;
        for delegation in delegations {
            self.recover_delegation(delegation);
        }
        Ok(())
    }

    fn recover_reservation(&mut self, reservation: Reservation) {
        let rid = reservation.id;
        if reservation.is_terminal() {
            tracing::info!(rid = %rid, state = reservation.state.as_str(), "terminal reservation skipped");
            return;
        }
        tracing::info!(
            rid = %rid,
            state = reservation.state.as_str(),
            pending = reservation.pending.as_str(),
            "recovering reservation"
        );

        self.policy.revisit(&reservation);
        let category = reservation.category;
        let pending = reservation.pending;
        self.re_register_reservation(reservation);

        match category {
            ReservationCategory::Client => self.classify_client_pending(rid, pending),
            ReservationCategory::Authority => self.restart_authority_pending(rid, pending),
            ReservationCategory::Broker => {
                // Broker operations are answered synchronously; a pending
                // state here means the crash hit mid-allocation and the
                // client will retry or time out.
                if pending != PendingState::None {
                    if let Some(r) = self.reservations.get_mut(&rid) {
                        r.notices.add("allocation interrupted by restart");
                        r.transition(r.state, PendingState::None);
                    }
                }
            }
        }
    }

    /// Client-side pending operations are re-issued on the first tick; the
    /// original outbound RPC is abandoned (the counterparty de-duplicates or
    /// re-answers).
    fn classify_client_pending(&mut self, rid: Id, pending: PendingState) {
        match pending {
            PendingState::Ticketing => self.deferred.ticketing.add(rid),
            PendingState::ExtendingTicket => self.deferred.extending_ticket.add(rid),
            PendingState::Redeeming => self.deferred.redeeming.add(rid),
            PendingState::ExtendingLease => self.deferred.extending_lease.add(rid),
            PendingState::ModifyingLease => self.deferred.modifying_lease.add(rid),
            PendingState::Closing => self.deferred.closing.add(rid),
            _ => {}
        }
        // Re-issue paths need the reservation back in its pre-dispatch
        // shape: the gate requires no pending operation, and the persisted
        // state field already holds the stable state to restart from.
        if pending != PendingState::None {
            if let Some(reservation) = self.reservations.get_mut(&rid) {
                let state = reservation.state;
                reservation.transition(state, PendingState::None);
            }
        }
    }

    /// Authority-side configuration actions restart with their recorded
    /// sequence; the handler's idempotence absorbs the replay.
    fn restart_authority_pending(&mut self, rid: Id, pending: PendingState) {
        match pending {
            PendingState::Redeeming => {
                // Crash before units were minted: run assignment again on
                // the first tick.
                self.deferred.redeeming.add(rid);
                if let Some(reservation) = self.reservations.get_mut(&rid) {
                    reservation.transition(reservation.state, PendingState::None);
                }
            }
            PendingState::Priming | PendingState::ModifyingLease | PendingState::Closing => {
                self.restart_configuration_actions(rid);
            }
            _ => {}
        }
    }

    /// Re-issue the in-flight configuration for units that have not reached
    /// their target state, with the same sequence number.
    fn restart_configuration_actions(&mut self, rid: Id) {
        let Some(reservation) = self.reservations.get_mut(&rid) else {
            return;
        };
        let Some(units) = reservation.resources.as_ref().and_then(|r| r.unit_set()) else {
            return;
        };

        let mut staged = Vec::new();
        for unit in units.iter() {
            let action = match unit.state {
                UnitState::Default | UnitState::Priming => Some(ConfigAction::Join),
                UnitState::Modifying => Some(ConfigAction::Modify),
                UnitState::Closing => Some(ConfigAction::Leave),
                _ => None,
            };
            if let Some(action) = action {
                tracing::info!(
                    rid = %rid,
                    unit = %unit.id,
                    action = action.as_str(),
                    sequence = unit.sequence,
                    "restarting configuration action"
                );
                staged.push(StagedConfig {
                    action,
                    unit: unit.clone(),
                });
            }
        }
        self.staged_configs.extend(staged);
    }

    fn recover_delegation(&mut self, delegation: Delegation) {
        let did = delegation.id;
        if delegation.is_terminal() {
            tracing::info!(did = %did, state = delegation.state.as_str(), "terminal delegation skipped");
            return;
        }
        tracing::info!(did = %did, state = delegation.state.as_str(), "recovering delegation");
        self.policy.revisit_delegation(&delegation);
        self.re_register_delegation(delegation);
    }

    /// Issue the operations deferred while `recovered` was false. Runs on
    /// the first tick.
    pub(crate) fn issue_deferred(&mut self) {
        let closing = self.deferred.closing.take();
        if !closing.is_empty() {
            tracing::debug!(actor = %self.identity.name, count = closing.len(), "issuing deferred closes");
            self.close_reservations(&closing);
        }

        for rid in self.deferred.ticketing.take() {
            if let Err(error) = self.start_ticketing(rid) {
                self.note_deferred_failure(rid, "ticket", &error.to_string());
            }
        }
        for rid in self.deferred.extending_ticket.take() {
            let term = self.reservations.get(&rid).and_then(|r| r.requested_term);
            if let Some(term) = term {
                if let Err(error) = self.start_extend_ticket(rid, term) {
                    self.note_deferred_failure(rid, "extend_ticket", &error.to_string());
                }
            }
        }
        for rid in self.deferred.redeeming.take() {
            match self.reservations.get(&rid).map(|r| r.category) {
                Some(ReservationCategory::Client) => {
                    if let Err(error) = self.start_redeem(rid) {
                        self.note_deferred_failure(rid, "redeem", &error.to_string());
                    }
                }
                Some(ReservationCategory::Authority) => self.authority_start_assign(rid),
                _ => {}
            }
        }
        for rid in self.deferred.extending_lease.take() {
            if let Err(error) = self.start_extend_lease(rid) {
                self.note_deferred_failure(rid, "extend_lease", &error.to_string());
            }
        }
        for rid in self.deferred.modifying_lease.take() {
            if let Err(error) = self.start_modify_lease(rid, std::collections::BTreeMap::new()) {
                self.note_deferred_failure(rid, "modify_lease", &error.to_string());
            }
        }
    }

    fn note_deferred_failure(&mut self, rid: Id, operation: &str, error: &str) {
        tracing::error!(rid = %rid, operation, error, "deferred operation failed");
        if let Some(reservation) = self.reservations.get_mut(&rid) {
            reservation.notices.add(format!("deferred {operation} failed: {error}"));
            reservation.mark_dirty();
        }
    }
}
