//! Kernel wrapper: registration, request validation, pending probes, and
//! failure propagation shared by all three roles.

use std::collections::BTreeMap;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    ActorRole, Delegation, FailedRpcInfo, Id, PendingState, Reservation, ReservationCategory,
    ReservationState, ReservationWire, ResourceSet, RpcEnvelope, RpcKind, RpcPayload, Slice,
    SliceKind, Term, UpdateData,
};

use super::actor::{Actor, StagedRemoval, StagedSend};

impl Actor {
    // --- registration -----------------------------------------------------

    pub(crate) fn register_slice(&mut self, slice: Slice) -> LatticeResult<Id> {
        self.validate_slice_kind(slice.kind)?;
        if self.slices.contains_key(&slice.id) {
            return Err(LatticeError::InvalidSlice(format!("slice {} already registered", slice.id)));
        }
        if self.slices.values().any(|s| s.name == slice.name) {
            return Err(LatticeError::InvalidSlice(format!(
                "slice name {} already in use",
                slice.name
            )));
        }
        let slice_id = slice.id;
        self.slices.insert(slice_id, slice);
        self.new_slices.insert(slice_id);
        self.dirty_slices.insert(slice_id);
        Ok(slice_id)
    }

    pub(crate) fn validate_slice_kind(&self, kind: SliceKind) -> LatticeResult<()> {
        let allowed = match kind {
            SliceKind::Inventory => matches!(self.role, ActorRole::Broker | ActorRole::Authority),
            SliceKind::Client => matches!(self.role, ActorRole::Orchestrator | ActorRole::Broker),
            SliceKind::BrokerClient => matches!(self.role, ActorRole::Broker | ActorRole::Authority),
        };
        if allowed {
            Ok(())
        } else {
            Err(LatticeError::InvalidSlice(format!(
                "{} slice not allowed on {}",
                kind.as_str(),
                self.role.as_str()
            )))
        }
    }

    /// Destroy a slice. Requires every owned reservation to be terminal.
    pub(crate) fn unregister_slice(&mut self, slice_id: Id) -> LatticeResult<()> {
        let slice = self
            .slices
            .get(&slice_id)
            .ok_or(LatticeError::NoSuchSlice(slice_id))?;

        for rid in &slice.reservations {
            if let Some(reservation) = self.reservations.get(rid) {
                if !reservation.is_terminal() {
                    return Err(LatticeError::InvalidSlice(format!(
                        "slice {slice_id} has non-terminal reservation {rid}"
                    )));
                }
            }
        }

        let slice = self.slices.remove(&slice_id).expect("checked above");
        for rid in &slice.reservations {
            self.reservations.remove(rid);
            self.staged_removals.push(StagedRemoval::Reservation(*rid));
        }
        for did in &slice.delegations {
            self.delegations.remove(did);
            self.staged_removals.push(StagedRemoval::Delegation(*did));
        }
        self.staged_removals.push(StagedRemoval::Slice(slice_id));
        self.dirty_slices.remove(&slice_id);
        self.new_slices.remove(&slice_id);
        Ok(())
    }

    pub(crate) fn register_reservation(&mut self, reservation: Reservation) -> LatticeResult<Id> {
        let slice = self
            .slices
            .get_mut(&reservation.slice_id)
            .ok_or(LatticeError::NoSuchSlice(reservation.slice_id))?;
        if self.reservations.contains_key(&reservation.id) {
            return Err(LatticeError::InvalidReservation(format!(
                "reservation {} already registered",
                reservation.id
            )));
        }
        slice.reservations.insert(reservation.id);
        self.dirty_slices.insert(reservation.slice_id);
        let rid = reservation.id;
        self.reservations.insert(rid, reservation);
        self.new_reservations.insert(rid);
        if let Some(reservation) = self.reservations.get_mut(&rid) {
            reservation.mark_dirty();
        }
        Ok(rid)
    }

    /// Recovery-path registration: the entity is already durable, nothing is
    /// marked dirty or new.
    pub(crate) fn re_register_slice(&mut self, slice: Slice) {
        self.slices.insert(slice.id, slice);
    }

    pub(crate) fn re_register_reservation(&mut self, reservation: Reservation) {
        self.reservations.insert(reservation.id, reservation);
    }

    pub(crate) fn re_register_delegation(&mut self, delegation: Delegation) {
        self.delegations.insert(delegation.id, delegation);
    }

    pub(crate) fn register_delegation(&mut self, delegation: Delegation) -> LatticeResult<Id> {
        let slice = self
            .slices
            .get_mut(&delegation.slice_id)
            .ok_or(LatticeError::NoSuchSlice(delegation.slice_id))?;
        if !slice.kind.is_inventory() {
            return Err(LatticeError::InvalidSlice(format!(
                "delegation {} must live in an inventory slice",
                delegation.id
            )));
        }
        if self.delegations.contains_key(&delegation.id) {
            return Err(LatticeError::InvalidArguments(format!(
                "delegation {} already registered",
                delegation.id
            )));
        }
        slice.delegations.insert(delegation.id);
        self.dirty_slices.insert(delegation.slice_id);
        let did = delegation.id;
        self.delegations.insert(did, delegation);
        self.new_delegations.insert(did);
        if let Some(delegation) = self.delegations.get_mut(&did) {
            delegation.dirty = true;
        }
        Ok(did)
    }

    // --- lookup -----------------------------------------------------------

    pub(crate) fn reservation_mut(&mut self, rid: Id) -> LatticeResult<&mut Reservation> {
        self.reservations
            .get_mut(&rid)
            .ok_or(LatticeError::NoSuchReservation(rid))
    }

    pub(crate) fn slice_name(&self, slice_id: Id) -> String {
        self.slices
            .get(&slice_id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    // --- wire helpers -----------------------------------------------------

    pub(crate) fn wire_for(
        reservation: &Reservation,
        slice_name: String,
        term: Option<Term>,
        rset: Option<ResourceSet>,
        sequence: u64,
    ) -> ReservationWire {
        ReservationWire {
            rid: reservation.id,
            slice_id: reservation.slice_id,
            slice_name,
            term,
            rset,
            sequence,
            authority: reservation.authority.clone(),
            state: None,
        }
    }

    /// Stage a request to a named peer; released by commit after persist.
    pub(crate) fn stage_request(&mut self, target: String, kind: RpcKind, payload: RpcPayload) {
        let envelope = RpcEnvelope::request(kind, self.identity.name.clone(), self.identity.clone(), payload);
        self.staged_sends.push(StagedSend { target, envelope });
    }

    /// Stage the response to an inbound request back to its callback topic.
    pub(crate) fn stage_response(
        &mut self,
        request: &RpcEnvelope,
        kind: RpcKind,
        payload: RpcPayload,
    ) {
        let envelope = RpcEnvelope::response(
            kind,
            request.message_id,
            self.identity.name.clone(),
            self.identity.clone(),
            payload,
        );
        self.staged_sends.push(StagedSend {
            target: request.callback_topic.clone(),
            envelope,
        });
    }

    /// Stage an unsolicited update (expiry closes, recovered operations).
    pub(crate) fn stage_update(&mut self, target: String, kind: RpcKind, payload: RpcPayload) {
        self.stage_request(target, kind, payload);
    }

    /// Respond to a reservation request with a failure code.
    pub(crate) fn respond_failed(&mut self, request: &RpcEnvelope, error: &LatticeError) {
        let Some(kind) = request.kind.expected_response() else {
            return;
        };
        let RpcPayload::Reservation(wire) = &request.payload else {
            return;
        };
        let payload = RpcPayload::ReservationUpdate {
            reservation: wire.clone(),
            update: UpdateData::failed(error.result_code(), error.to_string()),
        };
        self.stage_response(request, kind, payload);
    }

    // --- close / fail -----------------------------------------------------

    /// Close a set of reservations. Per-reservation failures are swallowed
    /// and recorded on the reservation's notices.
    pub(crate) fn close_reservations(&mut self, rids: &[Id]) {
        for rid in rids {
            if let Err(error) = self.start_close(*rid) {
                tracing::warn!(actor = %self.identity.name, rid = %rid, %error, "close failed");
                if let Some(reservation) = self.reservations.get_mut(rid) {
                    reservation.notices.add(format!("close failed: {error}"));
                    reservation.mark_dirty();
                }
            }
        }
    }

    /// Close one reservation, dispatching on its category. Requests are
    /// rejected while another operation is pending, except a reservation
    /// that has not been ticketed yet: nothing was granted, so it closes
    /// locally even mid-ticketing, with no outbound RPC.
    pub(crate) fn start_close(&mut self, rid: Id) -> LatticeResult<()> {
        let reservation = self
            .reservations
            .get(&rid)
            .ok_or(LatticeError::NoSuchReservation(rid))?;

        if reservation.is_terminal() || reservation.state == ReservationState::CloseWait {
            return Ok(());
        }
        if !self.recovered {
            self.deferred.closing.add(rid);
            return Ok(());
        }
        if reservation.state == ReservationState::Nascent {
            let reservation = self.reservations.get_mut(&rid).expect("present");
            reservation.transition(ReservationState::Closed, PendingState::None);
            return Ok(());
        }
        reservation.ensure_no_pending()?;

        match reservation.category {
            ReservationCategory::Client => self.client_close(rid),
            ReservationCategory::Broker => self.broker_close(rid),
            ReservationCategory::Authority => self.authority_close(rid, None),
        }
    }

    /// Force a reservation into `Failed`. Always accepted; the pending
    /// operation is abandoned and the counterparty learns through the next
    /// update or a timeout.
    pub(crate) fn fail_reservation(&mut self, rid: Id, message: &str) -> LatticeResult<()> {
        let reservation = self.reservation_mut(rid)?;
        reservation.fail(message);
        Ok(())
    }

    // --- probes -----------------------------------------------------------

    /// Probe every reservation's pending operation for completion, and
    /// release holdings retained from the previous extension cycle.
    pub(crate) fn probe_reservations(&mut self, cycle: u64) {
        tracing::trace!(actor = %self.identity.name, cycle, "probing pending reservations");
        let rids: Vec<Id> = self.reservations.keys().copied().collect();
        for rid in rids {
            let Some(reservation) = self.reservations.get(&rid) else {
                continue;
            };
            if reservation.category == ReservationCategory::Authority {
                self.probe_authority(rid);
            }
            if let Some(reservation) = self.reservations.get_mut(&rid) {
                if reservation.pending == PendingState::None {
                    reservation.release_previous();
                }
            }
        }
    }

    // --- failed rpc -------------------------------------------------------

    pub(crate) fn process_failed_rpc_envelope(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Failed(info) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("failed-rpc without payload".into()));
        };
        self.process_failed_rpc(info.clone());
        Ok(())
    }

    /// Resolve a failed request against its originating reservation or
    /// delegation: the pending operation fails and the entity returns to an
    /// actionable state.
    pub(crate) fn process_failed_rpc(&mut self, info: FailedRpcInfo) {
        tracing::warn!(
            actor = %self.identity.name,
            request = %info.request_id,
            kind = info.failed_kind.as_str(),
            failure = info.failure.as_str(),
            "processing failed rpc"
        );

        if let Some(rid) = info.reservation_id {
            if let Some(reservation) = self.reservations.get_mut(&rid) {
                reservation.notices.add(info.error_details.clone());
                match reservation.pending {
                    PendingState::Ticketing | PendingState::Redeeming => {
                        // Nothing granted yet; the reservation cannot make
                        // progress without the counterparty.
                        reservation.transition(ReservationState::Failed, PendingState::None);
                    }
                    PendingState::ExtendingTicket
                    | PendingState::ExtendingLease
                    | PendingState::ModifyingLease => {
                        // The optional operation failed; the current holding
                        // stays valid.
                        let state = reservation.state;
                        reservation.approved_term = None;
                        reservation.approved_resources = None;
                        reservation.transition(state, PendingState::None);
                    }
                    PendingState::Closing => {
                        // The close could not be delivered; close locally.
                        reservation.transition(ReservationState::Closed, PendingState::None);
                    }
                    _ => {
                        reservation.mark_dirty();
                    }
                }
            }
        }

        if let Some(did) = info.delegation_id {
            if let Some(delegation) = self.delegations.get_mut(&did) {
                delegation.fail(info.error_details.clone());
            }
        }
    }

    // --- query ------------------------------------------------------------

    /// Answer a query with basic actor status; unknown keys are echoed.
    pub(crate) fn handle_query(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Query(request) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("query without payload".into()));
        };

        let mut result: BTreeMap<String, String> = request.clone();
        result.insert("name".into(), self.identity.name.clone());
        result.insert("guid".into(), self.identity.guid.to_string());
        result.insert("role".into(), self.role.as_str().to_string());
        result.insert(
            "cycle".into(),
            self.current_cycle.map_or_else(|| "-1".into(), |c| c.to_string()),
        );
        result.insert("reservations".into(), self.reservations.len().to_string());

        self.stage_response(envelope, RpcKind::QueryResult, RpcPayload::QueryResult(result));
        Ok(())
    }
}
