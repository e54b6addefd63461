//! Broker-side protocol handlers: ticket allocation from claimed
//! inventory, ticket extension, relinquish, and the delegation claim flow.

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    ActorRole, AuthToken, Delegation, DelegationState, DelegationWire, Id, PendingState,
    Reservation, ReservationCategory, ReservationState, ResourceSet, ResourceType, RpcEnvelope,
    RpcKind, RpcPayload, Slice, SliceKind, UpdateData,
};

use super::actor::Actor;

/// Name of the broker's local slice holding claimed inventory.
const INVENTORY_SLICE: &str = "inventory";

impl Actor {
    // --- inbound requests -------------------------------------------------

    pub(crate) fn broker_handle_ticket(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        if self.role != ActorRole::Broker {
            let error = LatticeError::InvalidActor(format!(
                "{} does not allocate tickets",
                self.identity.name
            ));
            self.respond_failed(envelope, &error);
            return Err(error);
        }
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("ticket without payload".into()));
        };

        if let Some(existing) = self.reservations.get_mut(&wire.rid) {
            if !existing.accept_ticket_sequence(wire.sequence) {
                tracing::debug!(rid = %wire.rid, "duplicate ticket request ignored");
                return Ok(());
            }
            // Re-request after a client restart: answer with the current
            // allocation instead of allocating twice.
            if existing.state == ReservationState::Ticketed {
                self.respond_ticket_ok(wire.rid, envelope)?;
                return Ok(());
            }
            return Err(LatticeError::InvalidReservation(format!(
                "reservation {} already in progress",
                wire.rid
            )));
        }

        // First contact for this slice creates the local broker-client copy.
        let slice_id = self.ensure_counterparty_slice(
            wire.slice_id,
            &wire.slice_name,
            envelope.auth.clone(),
            SliceKind::BrokerClient,
        )?;

        let mut reservation = Reservation::inbound(
            wire.rid,
            slice_id,
            ReservationCategory::Broker,
            self.identity.clone(),
            envelope.auth.clone(),
            envelope.callback_topic.clone(),
        );
        reservation.requested_term = wire.term;
        reservation.requested_resources = wire.rset.clone();
        reservation.sequences.ticket_in = wire.sequence;
        let rid = self.register_reservation(reservation)?;

        let cycle = self.current_cycle.unwrap_or(0);
        let reservation = self.reservations.get_mut(&rid).expect("present");
        reservation.transition(ReservationState::Nascent, PendingState::Ticketing);

        let allocation = self.policy.allocate(reservation, cycle);
        match allocation {
            Ok(ticket) => {
                reservation.approved_term = Some(ticket.term);
                reservation.approved_resources = Some(ResourceSet::with_ticket(ticket));
                reservation.promote_approved();
                reservation.transition(ReservationState::Ticketed, PendingState::None);
                self.respond_ticket_ok(rid, envelope)?;
            }
            Err(error) => {
                reservation.fail(error.to_string());
                self.respond_failed(envelope, &error);
            }
        }
        Ok(())
    }

    pub(crate) fn broker_handle_extend_ticket(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("extend_ticket without payload".into()));
        };

        let Some(reservation) = self.reservations.get_mut(&wire.rid) else {
            let error = LatticeError::NoSuchReservation(wire.rid);
            self.respond_failed(envelope, &error);
            return Ok(());
        };
        if !reservation.accept_ticket_sequence(wire.sequence) {
            return Ok(());
        }
        if let Err(error) = reservation.ensure_no_pending() {
            self.respond_failed(envelope, &error);
            return Ok(());
        }

        let current = reservation.term;
        let requested = wire.term;
        let valid = match (current, requested) {
            (Some(current), Some(requested)) => requested.extends(&current),
            _ => false,
        };
        if !valid {
            let error = LatticeError::InvalidExtend(format!(
                "requested term does not extend reservation {}",
                wire.rid
            ));
            reservation.notices.add(error.to_string());
            reservation.mark_dirty();
            self.respond_failed(envelope, &error);
            return Ok(());
        }

        reservation.requested_term = requested;
        reservation.transition(ReservationState::Ticketed, PendingState::ExtendingTicket);

        let extension = self.policy.extend_allocation(reservation);
        match extension {
            Ok(ticket) => {
                reservation.approved_term = Some(ticket.term);
                reservation.approved_resources = Some(ResourceSet::with_ticket(ticket));
                reservation.promote_approved();
                reservation.transition(ReservationState::Ticketed, PendingState::None);
                self.respond_ticket_ok(wire.rid, envelope)?;
            }
            Err(error) => {
                // The extension is optional: the prior allocation stays.
                reservation.notices.add(error.to_string());
                reservation.transition(ReservationState::Ticketed, PendingState::None);
                self.respond_failed(envelope, &error);
            }
        }
        Ok(())
    }

    /// Relinquish returns an allocation with no response expected.
    pub(crate) fn broker_handle_relinquish(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::Reservation(wire) = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("relinquish without payload".into()));
        };
        let Some(reservation) = self.reservations.get_mut(&wire.rid) else {
            tracing::debug!(rid = %wire.rid, "relinquish for unknown reservation ignored");
            return Ok(());
        };
        if reservation.is_terminal() {
            return Ok(());
        }
        let snapshot = reservation.clone();
        self.policy.release(&snapshot);
        let reservation = self.reservations.get_mut(&wire.rid).expect("present");
        reservation.transition(ReservationState::Closed, PendingState::None);
        Ok(())
    }

    /// Local close of a broker-held reservation (expiry sweep).
    pub(crate) fn broker_close(&mut self, rid: Id) -> LatticeResult<()> {
        let Some(reservation) = self.reservations.get_mut(&rid) else {
            return Err(LatticeError::NoSuchReservation(rid));
        };
        if reservation.is_terminal() {
            return Ok(());
        }
        let snapshot = reservation.clone();
        self.policy.release(&snapshot);
        let reservation = self.reservations.get_mut(&rid).expect("present");
        reservation.transition(ReservationState::Closed, PendingState::None);
        Ok(())
    }

    fn respond_ticket_ok(&mut self, rid: Id, request: &RpcEnvelope) -> LatticeResult<()> {
        let slice_id = self.reservation_mut(rid)?.slice_id;
        let slice_name = self.slice_name(slice_id);

        // The authority the lease will live at comes from the delegation the
        // ticket was carved from.
        let authority = {
            let reservation = self.reservations.get(&rid).expect("present");
            reservation
                .resources
                .as_ref()
                .and_then(|r| r.ticket())
                .and_then(|t| self.delegations.get(&t.delegation_id))
                .map(|d| d.owner.name.clone())
        };

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_ticket_out();
        let mut wire = Self::wire_for(
            reservation,
            slice_name,
            reservation.term,
            reservation.resources.clone(),
            sequence,
        );
        wire.authority = authority;
        self.stage_response(
            request,
            RpcKind::UpdateTicket,
            RpcPayload::ReservationUpdate {
                reservation: wire,
                update: UpdateData::ok(),
            },
        );
        Ok(())
    }

    // --- delegation claim flow -------------------------------------------

    /// Claim a delegation from the named authority. Creates the local
    /// bookkeeping record in the broker's inventory slice; the graph and
    /// unit count arrive with the authority's update.
    pub(crate) fn broker_claim_delegation(&mut self, did: Id, authority: &str) -> LatticeResult<()> {
        if self.role != ActorRole::Broker {
            return Err(LatticeError::InvalidActor(format!(
                "{} does not claim delegations",
                self.identity.name
            )));
        }
        let slice_id = self.ensure_inventory_slice()?;

        if self.delegations.contains_key(&did) {
            return Err(LatticeError::InvalidArguments(format!(
                "delegation {did} already claimed or claiming"
            )));
        }

        let owner = AuthToken::new(authority, Id::new());
        let mut delegation = Delegation::new(slice_id, owner, 0, ResourceType::new("pending"));
        delegation.id = did;
        self.register_delegation(delegation)?;

        let delegation = self.delegations.get_mut(&did).expect("present");
        let sequence = delegation.next_sequence_out();
        let wire = DelegationWire {
            did,
            slice_id,
            slice_name: INVENTORY_SLICE.to_string(),
            graph: None,
            units: 0,
            rtype: ResourceType::new("pending"),
            sequence,
            state: None,
        };
        self.stage_request(
            authority.to_string(),
            RpcKind::ClaimDelegation,
            RpcPayload::Delegation(wire),
        );
        Ok(())
    }

    /// Return a claimed delegation to its authority.
    pub(crate) fn broker_reclaim_delegation(&mut self, did: Id) -> LatticeResult<()> {
        let Some(delegation) = self.delegations.get_mut(&did) else {
            return Err(LatticeError::NoSuchDelegation(did));
        };
        if delegation.state != DelegationState::Delegated {
            return Err(LatticeError::InvalidArguments(format!(
                "delegation {did} is not delegated"
            )));
        }
        let sequence = delegation.next_sequence_out();
        let authority = delegation.owner.name.clone();
        let wire = DelegationWire {
            did,
            slice_id: delegation.slice_id,
            slice_name: INVENTORY_SLICE.to_string(),
            graph: None,
            units: delegation.units,
            rtype: delegation.rtype.clone(),
            sequence,
            state: None,
        };
        self.stage_request(authority, RpcKind::ReclaimDelegation, RpcPayload::Delegation(wire));
        Ok(())
    }

    /// Authority's answer to a claim or reclaim.
    pub(crate) fn broker_handle_update_delegation(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::DelegationUpdate { delegation: wire, update } = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("update_delegation without payload".into()));
        };
        let Some(delegation) = self.delegations.get_mut(&wire.did) else {
            return Err(LatticeError::NoSuchDelegation(wire.did));
        };
        if wire.sequence <= delegation.sequence_in {
            return Ok(());
        }
        delegation.sequence_in = wire.sequence;
        delegation.dirty = true;

        if !update.is_ok() {
            delegation.fail(update.message.clone());
            return Ok(());
        }

        match wire.state {
            Some(DelegationState::Delegated) => {
                delegation.graph = wire.graph.clone();
                delegation.units = wire.units;
                delegation.rtype = wire.rtype.clone();
                delegation.owner = envelope.auth.clone();
                delegation.claim(self.identity.clone());
                let snapshot = delegation.clone();
                self.policy.donate_delegation(&snapshot);
            }
            Some(DelegationState::Reclaimed) => {
                delegation.reclaim();
                let snapshot = delegation.clone();
                self.policy.reclaim_delegation(&snapshot);
            }
            other => {
                tracing::warn!(did = %wire.did, ?other, "unexpected delegation update state");
            }
        }
        Ok(())
    }

    // --- local slices -----------------------------------------------------

    /// Find or create the local slice mirroring a counterparty's slice.
    pub(crate) fn ensure_counterparty_slice(
        &mut self,
        slice_id: Id,
        name: &str,
        owner: AuthToken,
        kind: SliceKind,
    ) -> LatticeResult<Id> {
        if self.slices.contains_key(&slice_id) {
            return Ok(slice_id);
        }
        let mut slice = Slice::new(name, owner, kind);
        slice.id = slice_id;
        self.register_slice(slice)
    }

    pub(crate) fn ensure_inventory_slice(&mut self) -> LatticeResult<Id> {
        if let Some(slice) = self.slices.values().find(|s| s.kind.is_inventory()) {
            return Ok(slice.id);
        }
        let slice = Slice::new(INVENTORY_SLICE, self.identity.clone(), SliceKind::Inventory);
        self.register_slice(slice)
    }
}
