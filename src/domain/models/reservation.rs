//! Reservation domain model.
//!
//! A reservation is a request for, or holding of, a quantity of typed
//! resources over a term. Its composite state is `(state, pending)`: the
//! stable protocol state plus the in-flight operation gating new requests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::errors::LatticeError;

use super::auth::AuthToken;
use super::id::Id;
use super::notice::Notice;
use super::resource_set::ResourceSet;
use super::term::Term;

/// Stable protocol state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Nascent,
    Ticketed,
    Active,
    /// Client side: lease active and a fresh ticket held for the next term.
    ActiveTicketed,
    Closed,
    /// Client side: close sent, awaiting the authority's confirmation.
    CloseWait,
    Failed,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nascent => "nascent",
            Self::Ticketed => "ticketed",
            Self::Active => "active",
            Self::ActiveTicketed => "active_ticketed",
            Self::Closed => "closed",
            Self::CloseWait => "close_wait",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "nascent" => Some(Self::Nascent),
            "ticketed" => Some(Self::Ticketed),
            "active" => Some(Self::Active),
            "active_ticketed" => Some(Self::ActiveTicketed),
            "closed" => Some(Self::Closed),
            "close_wait" => Some(Self::CloseWait),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// In-flight protocol operation. Gates new mutating operations: anything but
/// `None` rejects them with `ReservationHasPendingOperation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    None,
    Ticketing,
    ExtendingTicket,
    Redeeming,
    ExtendingLease,
    ModifyingLease,
    Priming,
    Closing,
    Blocked,
    Relinquishing,
}

impl PendingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ticketing => "ticketing",
            Self::ExtendingTicket => "extending_ticket",
            Self::Redeeming => "redeeming",
            Self::ExtendingLease => "extending_lease",
            Self::ModifyingLease => "modifying_lease",
            Self::Priming => "priming",
            Self::Closing => "closing",
            Self::Blocked => "blocked",
            Self::Relinquishing => "relinquishing",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "ticketing" => Some(Self::Ticketing),
            "extending_ticket" => Some(Self::ExtendingTicket),
            "redeeming" => Some(Self::Redeeming),
            "extending_lease" => Some(Self::ExtendingLease),
            "modifying_lease" => Some(Self::ModifyingLease),
            "priming" => Some(Self::Priming),
            "closing" => Some(Self::Closing),
            "blocked" => Some(Self::Blocked),
            "relinquishing" => Some(Self::Relinquishing),
            _ => None,
        }
    }
}

/// Which side of the protocol holds the reservation. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationCategory {
    /// Held by an orchestrator-side actor.
    Client,
    /// Held by a broker.
    Broker,
    /// Held by an authority.
    Authority,
}

impl ReservationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Broker => "broker",
            Self::Authority => "authority",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Self::Client),
            "broker" => Some(Self::Broker),
            "authority" => Some(Self::Authority),
            _ => None,
        }
    }
}

/// Per-direction monotonic sequence numbers used for duplicate suppression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    pub ticket_in: u64,
    pub ticket_out: u64,
    pub lease_in: u64,
    pub lease_out: u64,
}

/// The central protocol state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Id,
    pub slice_id: Id,
    pub category: ReservationCategory,
    pub state: ReservationState,
    pub pending: PendingState,

    /// What the client asked for, before policy review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_resources: Option<ResourceSet>,
    /// What policy granted, before it took effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_resources: Option<ResourceSet>,
    /// The current holding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSet>,
    /// Prior holding, retained for one extension cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_resources: Option<ResourceSet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_term: Option<Term>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_term: Option<Term>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<Term>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_term: Option<Term>,

    pub sequences: Sequences,

    /// Identity of the actor owning this reservation.
    pub owner: AuthToken,
    /// The counterparty that submitted the request (authority/broker side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<AuthToken>,
    /// Name of the broker this reservation tickets against (client side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    /// Name of the authority the ticket redeems against (client side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// Topic the counterparty listens on for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_topic: Option<String>,

    pub notices: Notice,

    /// Redeem automatically when the ticket update arrives (client side).
    #[serde(default)]
    pub autoredeem: bool,

    /// Set on every transition; cleared after the store committed it.
    #[serde(skip)]
    pub dirty: bool,

    /// Message id of the inbound request a deferred response will answer.
    /// Not persisted: after a restart the counterparty learns via timeout
    /// or an unsolicited update.
    #[serde(skip)]
    pub pending_request: Option<Id>,
}

impl Reservation {
    pub fn new(slice_id: Id, category: ReservationCategory, owner: AuthToken) -> Self {
        Self {
            id: Id::new(),
            slice_id,
            category,
            state: ReservationState::Nascent,
            pending: PendingState::None,
            requested_resources: None,
            approved_resources: None,
            resources: None,
            previous_resources: None,
            requested_term: None,
            approved_term: None,
            term: None,
            previous_term: None,
            sequences: Sequences::default(),
            owner,
            client: None,
            broker: None,
            authority: None,
            callback_topic: None,
            notices: Notice::new(),
            autoredeem: false,
            dirty: false,
            pending_request: None,
        }
    }

    /// Client-side reservation requesting `resources` over `term` from the
    /// named broker.
    pub fn client_request(
        slice_id: Id,
        owner: AuthToken,
        resources: ResourceSet,
        term: Term,
        broker: impl Into<String>,
    ) -> Self {
        let mut r = Self::new(slice_id, ReservationCategory::Client, owner);
        r.requested_resources = Some(resources);
        r.requested_term = Some(term);
        r.broker = Some(broker.into());
        r
    }

    pub fn with_autoredeem(mut self) -> Self {
        self.autoredeem = true;
        self
    }

    /// Local copy created by a broker or authority for an inbound request.
    /// Keeps the client's reservation id so both sides name the same
    /// logical reservation.
    pub fn inbound(
        rid: Id,
        slice_id: Id,
        category: ReservationCategory,
        owner: AuthToken,
        client: AuthToken,
        callback_topic: impl Into<String>,
    ) -> Self {
        let mut r = Self::new(slice_id, category, owner);
        r.id = rid;
        r.client = Some(client);
        r.callback_topic = Some(callback_topic.into());
        r
    }

    /// Move to a new composite state. Every transition marks the reservation
    /// dirty so the wrapper persists it before any outbound RPC is released.
    pub fn transition(&mut self, state: ReservationState, pending: PendingState) {
        tracing::debug!(
            rid = %self.id,
            from_state = self.state.as_str(),
            from_pending = self.pending.as_str(),
            to_state = state.as_str(),
            to_pending = pending.as_str(),
            "reservation transition"
        );
        self.state = state;
        self.pending = pending;
        self.dirty = true;
    }

    /// Gate for new mutating operations.
    pub fn ensure_no_pending(&self) -> Result<(), LatticeError> {
        if self.pending == PendingState::None {
            Ok(())
        } else {
            Err(LatticeError::ReservationHasPendingOperation(self.id))
        }
    }

    /// Always accepted: abandon any pending operation and mark failed.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.notices.add(message);
        self.transition(ReservationState::Failed, PendingState::None);
    }

    /// Mark a mutation without a state change (sequence bumps, resource
    /// swaps) so it still gets persisted.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReservationState::Closed
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ReservationState::Active | ReservationState::ActiveTicketed)
    }

    /// Whether the current term has expired as of `millis`.
    pub fn expired(&self, millis: i64) -> bool {
        self.term.is_some_and(|t| t.expired(millis))
    }

    /// Promote approved term/resources into the current holding, retaining
    /// the prior holding for one cycle.
    pub fn promote_approved(&mut self) {
        if let Some(term) = self.approved_term.take() {
            self.previous_term = self.term.replace(term);
        }
        if let Some(resources) = self.approved_resources.take() {
            self.previous_resources = self.resources.replace(resources);
        }
        self.dirty = true;
    }

    /// Drop holdings retained from the previous extension cycle.
    pub fn release_previous(&mut self) {
        if self.previous_resources.is_some() || self.previous_term.is_some() {
            self.previous_resources = None;
            self.previous_term = None;
            self.dirty = true;
        }
    }

    /// Units in the current holding.
    pub fn unit_count(&self) -> u64 {
        self.resources.as_ref().map_or(0, |r| r.units)
    }

    /// Validate that an incoming update sequence is fresh. Returns false for
    /// duplicates (sequence at or below the recorded inbound counter).
    pub fn accept_ticket_sequence(&mut self, sequence: u64) -> bool {
        if sequence <= self.sequences.ticket_in {
            return false;
        }
        self.sequences.ticket_in = sequence;
        self.dirty = true;
        true
    }

    pub fn accept_lease_sequence(&mut self, sequence: u64) -> bool {
        if sequence <= self.sequences.lease_in {
            return false;
        }
        self.sequences.lease_in = sequence;
        self.dirty = true;
        true
    }

    pub fn next_ticket_out(&mut self) -> u64 {
        self.sequences.ticket_out += 1;
        self.dirty = true;
        self.sequences.ticket_out
    }

    pub fn next_lease_out(&mut self) -> u64 {
        self.sequences.lease_out += 1;
        self.dirty = true;
        self.sequences.lease_out
    }
}

impl std::fmt::Display for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reservation {} [{}, {}]",
            self.id,
            self.state.as_str(),
            self.pending.as_str()
        )
    }
}

/// Id-keyed set of reservations, used for deferred-operation lists.
///
/// Stores ids only; the kernel table owns the reservation objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationSet {
    ids: BTreeSet<Id>,
}

impl ReservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rid: Id) {
        self.ids.insert(rid);
    }

    pub fn remove(&mut self, rid: &Id) {
        self.ids.remove(rid);
    }

    pub fn contains(&self, rid: &Id) -> bool {
        self.ids.contains(rid)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Id> {
        self.ids.iter()
    }

    /// Drain into a vector, leaving the set empty.
    pub fn take(&mut self) -> Vec<Id> {
        let ids: Vec<Id> = self.ids.iter().copied().collect();
        self.ids.clear();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::id::ResourceType;

    fn reservation() -> Reservation {
        Reservation::client_request(
            Id::new(),
            AuthToken::new("orchestrator", Id::new()),
            ResourceSet::request(2, ResourceType::from("vm")),
            Term::new(0, 999).unwrap(),
            "broker",
        )
    }

    #[test]
    fn pending_gates_new_operations() {
        let mut r = reservation();
        assert!(r.ensure_no_pending().is_ok());
        r.transition(ReservationState::Nascent, PendingState::Ticketing);
        assert!(matches!(
            r.ensure_no_pending(),
            Err(LatticeError::ReservationHasPendingOperation(_))
        ));
    }

    #[test]
    fn fail_is_always_accepted() {
        let mut r = reservation();
        r.transition(ReservationState::Ticketed, PendingState::Redeeming);
        r.fail("authority unreachable");
        assert_eq!(r.state, ReservationState::Failed);
        assert_eq!(r.pending, PendingState::None);
        assert!(!r.notices.is_empty());
    }

    #[test]
    fn transitions_mark_dirty() {
        let mut r = reservation();
        r.clear_dirty();
        r.transition(ReservationState::Nascent, PendingState::Ticketing);
        assert!(r.dirty);
        r.clear_dirty();
        assert!(!r.dirty);
    }

    #[test]
    fn duplicate_sequences_are_rejected() {
        let mut r = reservation();
        assert!(r.accept_ticket_sequence(1));
        assert!(!r.accept_ticket_sequence(1));
        assert!(!r.accept_ticket_sequence(0));
        assert!(r.accept_ticket_sequence(2));
        assert_eq!(r.next_ticket_out(), 1);
        assert_eq!(r.next_ticket_out(), 2);
    }

    #[test]
    fn promote_retains_previous_holding() {
        let mut r = reservation();
        let t1 = Term::new(0, 999).unwrap();
        r.approved_term = Some(t1);
        r.approved_resources = Some(ResourceSet::request(2, ResourceType::from("vm")));
        r.promote_approved();
        assert_eq!(r.term, Some(t1));
        assert!(r.previous_term.is_none());

        let t2 = t1.extend();
        r.approved_term = Some(t2);
        r.approved_resources = Some(ResourceSet::request(2, ResourceType::from("vm")));
        r.promote_approved();
        assert_eq!(r.term, Some(t2));
        assert_eq!(r.previous_term, Some(t1));
        r.release_previous();
        assert!(r.previous_term.is_none());
    }

    #[test]
    fn reservation_set_contains_by_id() {
        let mut set = ReservationSet::new();
        let rid = Id::new();
        set.add(rid);
        assert!(set.contains(&rid));
        assert_eq!(set.take(), vec![rid]);
        assert!(set.is_empty());
    }
}
