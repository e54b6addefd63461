//! Client-side protocol handlers: ticket/redeem/extend/modify/close
//! initiation and the inbound `UpdateTicket`/`UpdateLease` paths.

use std::collections::BTreeMap;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    Id, PendingState, Reservation, ReservationCategory, ReservationState, RpcKind, RpcPayload,
    RpcEnvelope, Term, UpdateData,
};

use super::actor::Actor;

impl Actor {
    // --- operation initiation --------------------------------------------

    /// Register a client reservation and start ticketing it against its
    /// broker. Before recovery completes the ticketing is deferred.
    pub(crate) fn submit_ticket(&mut self, reservation: Reservation) -> LatticeResult<Id> {
        if reservation.category != ReservationCategory::Client {
            return Err(LatticeError::InvalidReservation(
                "submit_ticket requires a client reservation".into(),
            ));
        }
        if reservation.broker.is_none() {
            return Err(LatticeError::NoSuchBroker("reservation names no broker".into()));
        }
        if reservation.requested_term.is_none() || reservation.requested_resources.is_none() {
            return Err(LatticeError::InvalidArguments(
                "reservation has no requested term or resources".into(),
            ));
        }

        let rid = self.register_reservation(reservation)?;
        if self.recovered {
            self.start_ticketing(rid)?;
        } else {
            self.deferred.ticketing.add(rid);
        }
        Ok(rid)
    }

    pub(crate) fn start_ticketing(&mut self, rid: Id) -> LatticeResult<()> {
        let slice_id = {
            let reservation = self.reservation_mut(rid)?;
            reservation.ensure_no_pending()?;
            if reservation.state != ReservationState::Nascent {
                return Err(LatticeError::InvalidReservation(format!(
                    "cannot ticket reservation in state {}",
                    reservation.state.as_str()
                )));
            }
            reservation.slice_id
        };
        let slice_name = self.slice_name(slice_id);

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_ticket_out();
        let wire = Self::wire_for(
            reservation,
            slice_name,
            reservation.requested_term,
            reservation.requested_resources.clone(),
            sequence,
        );
        let broker = reservation.broker.clone().expect("validated on submit");
        reservation.transition(ReservationState::Nascent, PendingState::Ticketing);
        self.stage_request(broker, RpcKind::Ticket, RpcPayload::Reservation(wire));
        Ok(())
    }

    /// Request extension of the held ticket to `new_term`.
    pub(crate) fn start_extend_ticket(&mut self, rid: Id, new_term: Term) -> LatticeResult<()> {
        let slice_id = {
            let reservation = self.reservation_mut(rid)?;
            reservation.ensure_no_pending()?;
            if !matches!(
                reservation.state,
                ReservationState::Ticketed | ReservationState::Active | ReservationState::ActiveTicketed
            ) {
                return Err(LatticeError::InvalidReservation(format!(
                    "cannot extend ticket in state {}",
                    reservation.state.as_str()
                )));
            }
            let current = reservation
                .term
                .ok_or_else(|| LatticeError::InvalidExtend("no current term".into()))?;
            if !new_term.extends(&current) {
                return Err(LatticeError::InvalidExtend(format!(
                    "term {new_term} does not extend {current}"
                )));
            }
            reservation.slice_id
        };
        let slice_name = self.slice_name(slice_id);

        let reservation = self.reservations.get_mut(&rid).expect("present");
        reservation.requested_term = Some(new_term);
        let sequence = reservation.next_ticket_out();
        let rset = reservation
            .requested_resources
            .clone()
            .or_else(|| reservation.resources.clone());
        let wire = Self::wire_for(reservation, slice_name, Some(new_term), rset, sequence);
        let broker = reservation
            .broker
            .clone()
            .ok_or_else(|| LatticeError::NoSuchBroker("reservation names no broker".into()))?;
        let state = reservation.state;
        reservation.transition(state, PendingState::ExtendingTicket);
        self.stage_request(broker, RpcKind::ExtendTicket, RpcPayload::Reservation(wire));
        Ok(())
    }

    /// Redeem the held ticket at its authority.
    pub(crate) fn start_redeem(&mut self, rid: Id) -> LatticeResult<()> {
        let slice_id = {
            let reservation = self.reservation_mut(rid)?;
            reservation.ensure_no_pending()?;
            if reservation.state != ReservationState::Ticketed {
                return Err(LatticeError::InvalidReservation(format!(
                    "cannot redeem reservation in state {}",
                    reservation.state.as_str()
                )));
            }
            if reservation.authority.is_none() {
                return Err(LatticeError::NoSuchActor("ticket names no authority".into()));
            }
            reservation.slice_id
        };
        let slice_name = self.slice_name(slice_id);

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_lease_out();
        let wire = Self::wire_for(
            reservation,
            slice_name,
            reservation.term,
            reservation.resources.clone(),
            sequence,
        );
        let authority = reservation.authority.clone().expect("checked above");
        reservation.transition(ReservationState::Ticketed, PendingState::Redeeming);
        self.stage_request(authority, RpcKind::Redeem, RpcPayload::Reservation(wire));
        Ok(())
    }

    /// Extend the lease at the authority, consuming the extended ticket
    /// obtained by `extend_ticket`.
    pub(crate) fn start_extend_lease(&mut self, rid: Id) -> LatticeResult<()> {
        let slice_id = {
            let reservation = self.reservation_mut(rid)?;
            reservation.ensure_no_pending()?;
            if reservation.state != ReservationState::ActiveTicketed {
                return Err(LatticeError::InvalidReservation(format!(
                    "extend_lease requires an extended ticket, state is {}",
                    reservation.state.as_str()
                )));
            }
            reservation.slice_id
        };
        let slice_name = self.slice_name(slice_id);

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_lease_out();
        let term = reservation.approved_term.or(reservation.requested_term);
        let rset = reservation
            .approved_resources
            .clone()
            .or_else(|| reservation.resources.clone());
        let wire = Self::wire_for(reservation, slice_name, term, rset, sequence);
        let authority = reservation
            .authority
            .clone()
            .ok_or_else(|| LatticeError::NoSuchActor("ticket names no authority".into()))?;
        reservation.transition(ReservationState::ActiveTicketed, PendingState::ExtendingLease);
        self.stage_request(authority, RpcKind::ExtendLease, RpcPayload::Reservation(wire));
        Ok(())
    }

    /// Modify the active lease's configuration properties.
    pub(crate) fn start_modify_lease(
        &mut self,
        rid: Id,
        properties: BTreeMap<String, String>,
    ) -> LatticeResult<()> {
        let slice_id = {
            let reservation = self.reservation_mut(rid)?;
            reservation.ensure_no_pending()?;
            if reservation.state != ReservationState::Active {
                return Err(LatticeError::InvalidReservation(format!(
                    "cannot modify lease in state {}",
                    reservation.state.as_str()
                )));
            }
            reservation.slice_id
        };
        let slice_name = self.slice_name(slice_id);

        let reservation = self.reservations.get_mut(&rid).expect("present");
        let sequence = reservation.next_lease_out();
        let mut rset = reservation.resources.clone().unwrap_or_else(|| {
            crate::domain::models::ResourceSet::request(0, crate::domain::models::ResourceType::new(""))
        });
        rset.sliver = serde_json::to_value(&properties).unwrap_or(serde_json::Value::Null);
        let wire = Self::wire_for(reservation, slice_name, reservation.term, Some(rset), sequence);
        let authority = reservation
            .authority
            .clone()
            .ok_or_else(|| LatticeError::NoSuchActor("lease names no authority".into()))?;
        reservation.transition(ReservationState::Active, PendingState::ModifyingLease);
        self.stage_request(authority, RpcKind::ModifyLease, RpcPayload::Reservation(wire));
        Ok(())
    }

    /// Client-side close of a granted reservation. A lease still held at
    /// the authority is closed there; a bare ticket is relinquished to the
    /// broker. The not-yet-ticketed case closes locally in the wrapper
    /// before dispatch reaches here.
    pub(crate) fn client_close(&mut self, rid: Id) -> LatticeResult<()> {
        let slice_id = self.reservation_mut(rid)?.slice_id;
        let slice_name = self.slice_name(slice_id);

        let reservation = self.reservations.get_mut(&rid).expect("present");
        match reservation.state {
            ReservationState::Ticketed => {
                let sequence = reservation.next_ticket_out();
                let wire = Self::wire_for(reservation, slice_name, reservation.term, None, sequence);
                let broker = reservation.broker.clone();
                reservation.transition(ReservationState::Closed, PendingState::None);
                if let Some(broker) = broker {
                    self.stage_request(broker, RpcKind::Relinquish, RpcPayload::Reservation(wire));
                }
                Ok(())
            }
            ReservationState::Active | ReservationState::ActiveTicketed => {
                let sequence = reservation.next_lease_out();
                let wire =
                    Self::wire_for(reservation, slice_name.clone(), reservation.term, None, sequence);
                let authority = reservation
                    .authority
                    .clone()
                    .ok_or_else(|| LatticeError::NoSuchActor("lease names no authority".into()))?;
                let broker = reservation.broker.clone();
                let ticket_sequence = reservation.next_ticket_out();
                let relinquish_wire =
                    Self::wire_for(reservation, slice_name, reservation.term, None, ticket_sequence);
                reservation.transition(ReservationState::CloseWait, PendingState::Closing);
                self.stage_request(authority, RpcKind::Close, RpcPayload::Reservation(wire));
                if let Some(broker) = broker {
                    self.stage_request(
                        broker,
                        RpcKind::Relinquish,
                        RpcPayload::Reservation(relinquish_wire),
                    );
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // --- inbound updates --------------------------------------------------

    pub(crate) fn client_handle_update_ticket(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::ReservationUpdate { reservation: wire, update } = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("update_ticket without payload".into()));
        };
        let Some(reservation) = self.reservations.get_mut(&wire.rid) else {
            return Err(LatticeError::NoSuchReservation(wire.rid));
        };
        if !reservation.accept_ticket_sequence(wire.sequence) {
            tracing::debug!(rid = %wire.rid, sequence = wire.sequence, "duplicate ticket update ignored");
            return Ok(());
        }

        if !update.is_ok() {
            return Ok(self.ticket_update_failed(wire.rid, update));
        }

        let reservation = self.reservations.get_mut(&wire.rid).expect("present");
        match reservation.pending {
            PendingState::Ticketing => {
                reservation.term = wire.term;
                reservation.resources = wire.rset.clone();
                reservation.requested_resources = None;
                if wire.authority.is_some() {
                    reservation.authority = wire.authority.clone();
                }
                reservation.transition(ReservationState::Ticketed, PendingState::None);
                let snapshot = reservation.clone();
                self.policy.ticket_satisfied(&snapshot);
                if snapshot.autoredeem {
                    self.start_redeem(wire.rid)?;
                }
            }
            PendingState::ExtendingTicket => {
                if reservation.state == ReservationState::Ticketed {
                    // Not redeemed yet: the extended ticket replaces the
                    // holding outright.
                    reservation.previous_term = reservation.term.replace(
                        wire.term.ok_or_else(|| {
                            LatticeError::InvalidArguments("extension update without term".into())
                        })?,
                    );
                    reservation.previous_resources =
                        std::mem::replace(&mut reservation.resources, wire.rset.clone());
                    reservation.transition(ReservationState::Ticketed, PendingState::None);
                } else {
                    // Lease active: hold the new ticket until extend_lease.
                    reservation.approved_term = wire.term;
                    reservation.approved_resources = wire.rset.clone();
                    reservation.transition(ReservationState::ActiveTicketed, PendingState::None);
                }
                let snapshot = reservation.clone();
                self.policy.ticket_satisfied(&snapshot);
            }
            other => {
                tracing::warn!(
                    rid = %wire.rid,
                    pending = other.as_str(),
                    "unexpected ticket update ignored"
                );
            }
        }
        Ok(())
    }

    fn ticket_update_failed(&mut self, rid: Id, update: &UpdateData) {
        let Some(reservation) = self.reservations.get_mut(&rid) else {
            return;
        };
        reservation.notices.add(update.message.clone());
        match reservation.pending {
            PendingState::Ticketing => {
                reservation.transition(ReservationState::Failed, PendingState::None);
            }
            PendingState::ExtendingTicket => {
                // Extension is optional: fall back to the current holding.
                let state = reservation.state;
                reservation.transition(state, PendingState::None);
            }
            _ => reservation.mark_dirty(),
        }
    }

    pub(crate) fn client_handle_update_lease(&mut self, envelope: &RpcEnvelope) -> LatticeResult<()> {
        let RpcPayload::ReservationUpdate { reservation: wire, update } = &envelope.payload else {
            return Err(LatticeError::InvalidArguments("update_lease without payload".into()));
        };
        let Some(reservation) = self.reservations.get_mut(&wire.rid) else {
            return Err(LatticeError::NoSuchReservation(wire.rid));
        };
        if !reservation.accept_lease_sequence(wire.sequence) {
            tracing::debug!(rid = %wire.rid, sequence = wire.sequence, "duplicate lease update ignored");
            return Ok(());
        }

        if !update.is_ok() {
            reservation.notices.add(update.message.clone());
            match reservation.pending {
                PendingState::Redeeming => {
                    reservation.transition(ReservationState::Failed, PendingState::None);
                }
                PendingState::ExtendingLease | PendingState::ModifyingLease => {
                    reservation.approved_term = None;
                    reservation.approved_resources = None;
                    reservation.transition(ReservationState::Active, PendingState::None);
                }
                PendingState::Closing => {
                    reservation.transition(ReservationState::Closed, PendingState::None);
                }
                _ => reservation.mark_dirty(),
            }
            return Ok(());
        }

        // A closed terminal state at the authority closes the client side
        // regardless of what was pending (expiry close, confirmed close).
        if wire.state == Some(ReservationState::Closed) {
            reservation.transition(ReservationState::Closed, PendingState::None);
            let snapshot = reservation.clone();
            self.policy.lease_satisfied(&snapshot);
            return Ok(());
        }

        match reservation.pending {
            PendingState::Redeeming => {
                reservation.term = wire.term;
                reservation.resources = wire.rset.clone();
                reservation.transition(ReservationState::Active, PendingState::None);
            }
            PendingState::ExtendingLease => {
                reservation.previous_term = reservation.term.take();
                reservation.previous_resources = reservation.resources.take();
                reservation.term = wire.term;
                reservation.resources = wire.rset.clone();
                reservation.approved_term = None;
                reservation.approved_resources = None;
                reservation.transition(ReservationState::Active, PendingState::None);
            }
            PendingState::ModifyingLease => {
                reservation.resources = wire.rset.clone();
                reservation.transition(ReservationState::Active, PendingState::None);
            }
            other => {
                tracing::warn!(
                    rid = %wire.rid,
                    pending = other.as_str(),
                    "unexpected lease update ignored"
                );
                return Ok(());
            }
        }
        let snapshot = self.reservations.get(&wire.rid).expect("present").clone();
        self.policy.lease_satisfied(&snapshot);
        Ok(())
    }
}
