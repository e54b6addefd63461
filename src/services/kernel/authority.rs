//! Authority-side protocol handlers: redeem into leased units, lease
//! extension and modification, close, delegation claim/reclaim, and the
//! priming probe that completes unit configuration.

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    ActorRole, ConfigAction, DelegationState, DelegationWire, Id, PendingState, Reservation,
    ReservationCategory, ReservationState, ResourceSet, RpcEnvelope, RpcKind, RpcPayload,
    SliceKind, UpdateData,
};
use crate::domain::ports::ConfigComplete;

use super::actor::{Actor, StagedConfig, StagedSend};

impl Actor {
    // --- redeem -----------------------------------------------------------

    pub(crate) fn authority_handle_redeem(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        if self.role != ActorRole::Authority {
            let error = LatticeError::InvalidActor(format!(
                "{} does not redeem tickets",
                self.identity.name
            ));
            self.respond_failed(envelope, &error);
            return Err(error);
        }
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("redeem without payload".into()));
        };

        if let Some(existing) = self.reservations.get_mut(&wire.rid) {
            if !existing.accept_lease_sequence(wire.sequence) {
                tracing::debug!(rid = %wire.rid, "duplicate redeem ignored");
                return Ok(());
            }
            // Re-request after a client restart.
            match existing.state {
                ReservationState::Active => {
                    self.respond_lease(wire.rid, Some(envelope.message_id), None);
                    return Ok(());
                }
                _ => {
                    existing.pending_request = Some(envelope.message_id);
                    return Ok(());
                }
            }
        }

        let ticket_ok = wire
            .rset
            .as_ref()
            .is_some_and(|rset| rset.ticket().is_some());
        if !ticket_ok || wire.term.is_none() {
            let error = LatticeError::InvalidReservation(format!(
                "redeem for {} carries no ticket",
                wire.rid
            ));
            self.respond_failed(envelope, &error);
            return Ok(());
        }

        let slice_id = self.ensure_counterparty_slice(
            wire.slice_id,
            &wire.slice_name,
            envelope.auth.clone(),
            SliceKind::BrokerClient,
        )?;

        let mut reservation = Reservation::inbound(
            wire.rid,
            slice_id,
            ReservationCategory::Authority,
            self.identity.clone(),
            envelope.auth.clone(),
            envelope.callback_topic.clone(),
        );
        reservation.requested_term = wire.term;
        reservation.requested_resources = wire.rset.clone();
        reservation.term = wire.term;
        reservation.sequences.lease_in = wire.sequence;
        reservation.state = ReservationState::Ticketed;
        reservation.pending_request = Some(envelope.message_id);
        let rid = self.register_reservation(reservation)?;

        self.authority_start_assign(rid);
        Ok(())
    }

    /// Run the assignment pipeline: policy mints units, each unit starts a
    /// join action, and the reservation primes until all joins complete.
    pub(crate) fn authority_start_assign(&mut self, rid: Id) {
        let reservation = self.reservations.get_mut(&rid).expect("present");
        reservation.transition(ReservationState::Ticketed, PendingState::Redeeming);

        let assignment = self.policy.assign(reservation);
        match assignment {
            Ok(mut units) => {
                let rtype = reservation
                    .requested_resources
                    .as_ref()
                    .map_or_else(|| units.iter().next().map(|u| u.rtype.clone()).unwrap_or_default(), |r| {
                        r.rtype.clone()
                    });
                let mut staged = Vec::new();
                for unit in units.iter_mut() {
                    unit.start_prime();
                    unit.next_sequence();
                    self.new_units.insert(unit.id);
                    staged.push(StagedConfig {
                        action: ConfigAction::Join,
                        unit: unit.clone(),
                    });
                }
                reservation.resources = Some(ResourceSet::with_units(rtype, units));
                reservation.transition(ReservationState::Ticketed, PendingState::Priming);
                self.staged_configs.extend(staged);
            }
            Err(error) => {
                reservation.fail(error.to_string());
                self.respond_lease_failed(rid, &error);
            }
        }
    }

    // --- extend / modify --------------------------------------------------

    pub(crate) fn authority_handle_extend_lease(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("extend_lease without payload".into()));
        };
        let Some(reservation) = self.reservations.get_mut(&wire.rid) else {
            let error = LatticeError::NoSuchReservation(wire.rid);
            self.respond_failed(envelope, &error);
            return Ok(());
        };

        // Only the recorded client may extend its lease.
        if reservation.client.as_ref() != Some(&envelope.auth) {
            let error = LatticeError::InvalidArguments(format!(
                "caller {} is not the client of {}",
                envelope.auth.name, wire.rid
            ));
            self.respond_failed(envelope, &error);
            return Ok(());
        }
        if !reservation.accept_lease_sequence(wire.sequence) {
            return Ok(());
        }
        if let Err(error) = reservation.ensure_no_pending() {
            self.respond_failed(envelope, &error);
            return Ok(());
        }
        if !reservation.is_active() {
            let error = LatticeError::InvalidReservation(format!(
                "cannot extend lease in state {}",
                reservation.state.as_str()
            ));
            self.respond_failed(envelope, &error);
            return Ok(());
        }

        let valid = match (reservation.term, wire.term) {
            (Some(current), Some(requested)) => requested.extends(&current),
            _ => false,
        };
        if !valid {
            let error = LatticeError::InvalidExtend(format!(
                "requested term does not extend lease {}",
                wire.rid
            ));
            reservation.notices.add(error.to_string());
            reservation.mark_dirty();
            self.respond_failed(envelope, &error);
            return Ok(());
        }

        let new_term = wire.term.expect("validated above");
        reservation.requested_term = Some(new_term);
        reservation.transition(ReservationState::Active, PendingState::ExtendingLease);

        let plan = self.policy.extend_lease(reservation, &new_term);
        match plan {
            Ok(modified) => {
                let reservation = self.reservations.get_mut(&wire.rid).expect("present");
                reservation.approved_term = Some(new_term);
                if modified.is_empty() {
                    reservation.previous_term = reservation.term.replace(new_term);
                    reservation.approved_term = None;
                    reservation.transition(ReservationState::Active, PendingState::None);
                    self.respond_lease(wire.rid, Some(envelope.message_id), None);
                } else {
                    let mut staged = Vec::new();
                    if let Some(units) = reservation
                        .resources
                        .as_mut()
                        .and_then(|r| r.unit_set_mut())
                    {
                        for unit_id in &modified {
                            if let Some(unit) = units.get_mut(unit_id) {
                                if unit.start_modify() {
                                    unit.next_sequence();
                                    staged.push(StagedConfig {
                                        action: ConfigAction::Modify,
                                        unit: unit.clone(),
                                    });
                                }
                            }
                        }
                    }
                    reservation.pending_request = Some(envelope.message_id);
                    reservation.transition(ReservationState::Active, PendingState::ModifyingLease);
                    self.staged_configs.extend(staged);
                }
            }
            Err(error) => {
                let reservation = self.reservations.get_mut(&wire.rid).expect("present");
                reservation.notices.add(error.to_string());
                reservation.approved_term = None;
                reservation.transition(ReservationState::Active, PendingState::None);
                self.respond_failed(envelope, &error);
            }
        }
        Ok(())
    }

    pub(crate) fn authority_handle_modify_lease(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("modify_lease without payload".into()));
        };
        let Some(reservation) = self.reservations.get_mut(&wire.rid) else {
            let error = LatticeError::NoSuchReservation(wire.rid);
            self.respond_failed(envelope, &error);
            return Ok(());
        };
        if reservation.client.as_ref() != Some(&envelope.auth) {
            let error = LatticeError::InvalidArguments(format!(
                "caller {} is not the client of {}",
                envelope.auth.name, wire.rid
            ));
            self.respond_failed(envelope, &error);
            return Ok(());
        }
        if !reservation.accept_lease_sequence(wire.sequence) {
            return Ok(());
        }
        if let Err(error) = reservation.ensure_no_pending() {
            // Modify while priming is one pending operation too many.
            self.respond_failed(envelope, &error);
            return Ok(());
        }
        if reservation.state != ReservationState::Active {
            let error = LatticeError::InvalidReservation(format!(
                "cannot modify lease in state {}",
                reservation.state.as_str()
            ));
            self.respond_failed(envelope, &error);
            return Ok(());
        }

        let properties: std::collections::BTreeMap<String, String> = wire
            .rset
            .as_ref()
            .and_then(|r| serde_json::from_value(r.sliver.clone()).ok())
            .unwrap_or_default();

        let mut staged = Vec::new();
        if let Some(units) = reservation.resources.as_mut().and_then(|r| r.unit_set_mut()) {
            for unit in units.iter_mut() {
                if unit.start_modify() {
                    for (key, value) in &properties {
                        unit.set_property(key.clone(), value.clone());
                    }
                    unit.next_sequence();
                    staged.push(StagedConfig {
                        action: ConfigAction::Modify,
                        unit: unit.clone(),
                    });
                }
            }
        }
        reservation.pending_request = Some(envelope.message_id);
        reservation.transition(ReservationState::Active, PendingState::ModifyingLease);
        self.staged_configs.extend(staged);
        Ok(())
    }

    // --- close ------------------------------------------------------------

    pub(crate) fn authority_handle_close(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("close without payload".into()));
        };
        let Some(reservation) = self.reservations.get(&wire.rid) else {
            // No side effect for an unknown reservation.
            let error = LatticeError::NoSuchReservation(wire.rid);
            self.respond_failed(envelope, &error);
            return Ok(());
        };
        if reservation.is_closed() {
            self.respond_lease(wire.rid, Some(envelope.message_id), None);
            return Ok(());
        }
        self.authority_close(wire.rid, Some(envelope.message_id))
    }

    /// Start closing a lease: every unit leaves, the reservation closes when
    /// the last unit is gone. With no units the close is immediate.
    pub(crate) fn authority_close(&mut self, rid: Id, request: Option<Id>) -> LatticeResult<()> {
        let reservation = self.reservation_mut(rid)?;
        if reservation.is_terminal() {
            return Ok(());
        }

        let mut staged = Vec::new();
        let mut has_units = false;
        if let Some(units) = reservation.resources.as_mut().and_then(|r| r.unit_set_mut()) {
            for unit in units.iter_mut() {
                if !unit.state.is_terminal() {
                    has_units = true;
                    unit.start_close();
                    unit.next_sequence();
                    staged.push(StagedConfig {
                        action: ConfigAction::Leave,
                        unit: unit.clone(),
                    });
                }
            }
        }

        if request.is_some() {
            reservation.pending_request = request;
        }
        if has_units {
            let state = reservation.state;
            reservation.transition(state, PendingState::Closing);
            self.staged_configs.extend(staged);
        } else {
            reservation.transition(ReservationState::Closed, PendingState::None);
            let snapshot = self.reservations.get(&rid).expect("present").clone();
            self.policy.freed(0, &snapshot);
            self.respond_lease(rid, request, Some(ReservationState::Closed));
        }
        Ok(())
    }

    // --- delegations ------------------------------------------------------

    pub(crate) fn authority_handle_claim(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Delegation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("claim without payload".into()));
        };

        let Some(delegation) = self.delegations.get_mut(&wire.did) else {
            let error = LatticeError::NoSuchDelegation(wire.did);
            self.respond_delegation_failed(envelope, &error);
            return Ok(());
        };
        if delegation.state == DelegationState::Delegated {
            // Duplicate claim: answer with the current state.
        } else {
            delegation.claim(envelope.auth.clone());
        }
        self.respond_delegation(wire.did, envelope, DelegationState::Delegated);
        Ok(())
    }

    pub(crate) fn authority_handle_reclaim(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Delegation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("reclaim without payload".into()));
        };
        let Some(delegation) = self.delegations.get_mut(&wire.did) else {
            let error = LatticeError::NoSuchDelegation(wire.did);
            self.respond_delegation_failed(envelope, &error);
            return Ok(());
        };
        if delegation.state == DelegationState::Delegated {
            delegation.reclaim();
        }
        self.respond_delegation(wire.did, envelope, DelegationState::Reclaimed);
        Ok(())
    }

    fn respond_delegation(&mut self, did: Id, request: &RpcEnvelope, state: DelegationState) {
        let Some(delegation) = self.delegations.get_mut(&did) else {
            return;
        };
        let sequence = delegation.next_sequence_out();
        let wire = DelegationWire {
            did,
            slice_id: delegation.slice_id,
            slice_name: String::new(),
            graph: delegation.graph.clone(),
            units: delegation.units,
            rtype: delegation.rtype.clone(),
            sequence,
            state: Some(state),
        };
        self.stage_response(
            request,
            RpcKind::UpdateDelegation,
            RpcPayload::DelegationUpdate {
                delegation: wire,
                update: UpdateData::ok(),
            },
        );
    }

    pub(crate) fn respond_delegation_failed(&mut self, request: &RpcEnvelope, error: &LatticeError) {
        let RpcPayload::Delegation(wire) = &request.payload else {
            return;
        };
        self.stage_response(
            request,
            RpcKind::UpdateDelegation,
            RpcPayload::DelegationUpdate {
                delegation: wire.clone(),
                update: UpdateData::failed(error.result_code(), error.to_string()),
            },
        );
    }

    // --- configuration completions and probes -----------------------------

    pub(crate) fn handle_config_complete(&mut self, completion: ConfigComplete) {
        let Some(reservation) = self.reservations.get_mut(&completion.reservation_id) else {
            tracing::debug!(unit = %completion.unit_id, "completion for unknown reservation dropped");
            return;
        };
        let Some(unit) = reservation
            .resources
            .as_mut()
            .and_then(|r| r.unit_set_mut())
            .and_then(|units| units.get_mut(&completion.unit_id))
        else {
            tracing::debug!(unit = %completion.unit_id, "completion for unknown unit dropped");
            return;
        };
        if completion.sequence < unit.sequence {
            tracing::debug!(
                unit = %completion.unit_id,
                got = completion.sequence,
                expected = unit.sequence,
                "stale completion ignored"
            );
            return;
        }

        match (completion.action, &completion.error) {
            (ConfigAction::Join, None) => unit.activate(),
            (ConfigAction::Join, Some(error)) => unit.fail(format!("join failed: {error}")),
            (ConfigAction::Modify, None) => unit.activate(),
            (ConfigAction::Modify, Some(error)) => {
                unit.fail_on_modify(format!("modify failed: {error}"));
            }
            (ConfigAction::Leave, None) => unit.close(),
            (ConfigAction::Leave, Some(error)) => {
                unit.notices.add(format!("leave failed: {error}"));
                unit.close();
            }
        }
        reservation.mark_dirty();
        self.probe_authority(completion.reservation_id);
    }

    /// Check whether the pending operation of an authority-side reservation
    /// has run its course, and finish it if so.
    pub(crate) fn probe_authority(&mut self, rid: Id) {
        let Some(reservation) = self.reservations.get_mut(&rid) else {
            return;
        };
        let (has_pending, failed, active, total) = {
            let Some(units) = reservation.resources.as_ref().and_then(|r| r.unit_set()) else {
                return;
            };
            (
                units.has_pending(),
                units.failed_count(),
                units.active_count(),
                units.len() as u64,
            )
        };
        if has_pending {
            return;
        }

        match reservation.pending {
            PendingState::Priming => {
                if failed > 0 {
                    let error = LatticeError::InternalError(format!(
                        "{failed} unit(s) failed to join"
                    ));
                    reservation.fail(error.to_string());
                    self.respond_lease_failed(rid, &error);
                } else {
                    if let Some(resources) = reservation.resources.as_mut() {
                        resources.units = active;
                    }
                    reservation.transition(ReservationState::Active, PendingState::None);
                    let request = reservation.pending_request.take();
                    self.respond_lease(rid, request, None);
                }
            }
            PendingState::ModifyingLease => {
                // Approved term present means this was an extension.
                if let Some(term) = reservation.approved_term.take() {
                    reservation.previous_term = reservation.term.replace(term);
                }
                if let Some(resources) = reservation.resources.as_mut() {
                    resources.units = active;
                }
                reservation.transition(ReservationState::Active, PendingState::None);
                let request = reservation.pending_request.take();
                self.respond_lease(rid, request, None);
            }
            PendingState::Closing => {
                let freed = total;
                reservation.transition(ReservationState::Closed, PendingState::None);
                let request = reservation.pending_request.take();
                let snapshot = self.reservations.get(&rid).expect("present").clone();
                self.policy.freed(freed, &snapshot);
                self.respond_lease(rid, request, Some(ReservationState::Closed));
            }
            _ => {}
        }
    }

    // --- responses --------------------------------------------------------

    /// Send `UpdateLease` for the reservation's current holding. With a
    /// request id it answers that request; without one it is an unsolicited
    /// update (expiry close, post-recovery completion).
    pub(crate) fn respond_lease(&mut self, rid: Id, request: Option<Id>, state: Option<ReservationState>) {
        let Some(reservation) = self.reservations.get(&rid) else {
            return;
        };
        let slice_name = self.slice_name(reservation.slice_id);
        let Some(callback) = reservation.callback_topic.clone() else {
            return;
        };

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_lease_out();
        // Orchestrator-side reservations see unit counts, not units: the
        // concrete set stays home.
        let rset = reservation.resources.as_ref().map(|r| ResourceSet {
            units: r.units,
            rtype: r.rtype.clone(),
            sliver: r.sliver.clone(),
            concrete: None,
        });
        let mut wire = Self::wire_for(reservation, slice_name, reservation.term, rset, sequence);
        wire.state = state;
        let payload = RpcPayload::ReservationUpdate {
            reservation: wire,
            update: UpdateData::ok(),
        };

        let envelope = match request {
            Some(request_id) => RpcEnvelope::response(
                RpcKind::UpdateLease,
                request_id,
                self.identity.name.clone(),
                self.identity.clone(),
                payload,
            ),
            None => RpcEnvelope::request(
                RpcKind::UpdateLease,
                self.identity.name.clone(),
                self.identity.clone(),
                payload,
            ),
        };
        self.staged_sends.push(StagedSend {
            target: callback,
            envelope,
        });
    }

    pub(crate) fn respond_lease_failed(&mut self, rid: Id, error: &LatticeError) {
        let Some(reservation) = self.reservations.get(&rid) else {
            return;
        };
        let slice_name = self.slice_name(reservation.slice_id);
        let Some(callback) = reservation.callback_topic.clone() else {
            return;
        };

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_lease_out();
        let notices = reservation.notices.joined();
        let request = reservation.pending_request.take();
        let wire = Self::wire_for(reservation, slice_name, reservation.term, None, sequence);
        let message = if notices.is_empty() {
            error.to_string()
        } else {
            notices
        };
        let payload = RpcPayload::ReservationUpdate {
            reservation: wire,
            update: UpdateData::failed(error.result_code(), message),
        };

        let envelope = match request {
            Some(request_id) => RpcEnvelope::response(
                RpcKind::UpdateLease,
                request_id,
                self.identity.name.clone(),
                self.identity.clone(),
                payload,
            ),
            None => RpcEnvelope::request(
                RpcKind::UpdateLease,
                self.identity.name.clone(),
                self.identity.clone(),
                payload,
            ),
        };
        self.staged_sends.push(StagedSend {
            target: callback,
            envelope,
        });
    }
}
