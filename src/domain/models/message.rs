//! The logical protocol message set exchanged between actors.
//!
//! Local proxies pass envelopes by value; remote proxies serialize them to
//! JSON on the transport topic named by `callback_topic`/the target's topic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::auth::AuthToken;
use super::delegation::DelegationState;
use super::id::{Id, ResourceType};
use super::reservation::ReservationState;
use super::resource_set::ResourceSet;
use super::term::Term;

/// Message kind. Requests flow Orchestrator -> Broker -> Authority; updates
/// flow back along the recorded callback topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcKind {
    Ticket,
    ExtendTicket,
    Redeem,
    ExtendLease,
    ModifyLease,
    Close,
    Relinquish,
    ClaimDelegation,
    ReclaimDelegation,
    UpdateTicket,
    UpdateLease,
    UpdateDelegation,
    Query,
    QueryResult,
    FailedRpc,
}

impl RpcKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::ExtendTicket => "extend_ticket",
            Self::Redeem => "redeem",
            Self::ExtendLease => "extend_lease",
            Self::ModifyLease => "modify_lease",
            Self::Close => "close",
            Self::Relinquish => "relinquish",
            Self::ClaimDelegation => "claim_delegation",
            Self::ReclaimDelegation => "reclaim_delegation",
            Self::UpdateTicket => "update_ticket",
            Self::UpdateLease => "update_lease",
            Self::UpdateDelegation => "update_delegation",
            Self::Query => "query",
            Self::QueryResult => "query_result",
            Self::FailedRpc => "failed_rpc",
        }
    }

    /// Response kind the sender waits for, if any. Requests with no entry
    /// are fire-and-forget.
    pub fn expected_response(&self) -> Option<RpcKind> {
        match self {
            Self::Ticket | Self::ExtendTicket => Some(Self::UpdateTicket),
            Self::Redeem | Self::ExtendLease | Self::ModifyLease | Self::Close => {
                Some(Self::UpdateLease)
            }
            Self::ClaimDelegation | Self::ReclaimDelegation => Some(Self::UpdateDelegation),
            Self::Query => Some(Self::QueryResult),
            _ => None,
        }
    }

    /// Whether this request mutates reservation state on the receiver.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Ticket
                | Self::ExtendTicket
                | Self::Redeem
                | Self::ExtendLease
                | Self::ModifyLease
                | Self::Close
                | Self::Relinquish
        )
    }
}

impl std::fmt::Display for RpcKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome attached to every update message. Code 0 is success; negative
/// codes map to the error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateData {
    pub result_code: i32,
    pub message: String,
}

impl UpdateData {
    pub fn ok() -> Self {
        Self {
            result_code: 0,
            message: String::new(),
        }
    }

    pub fn failed(result_code: i32, message: impl Into<String>) -> Self {
        Self {
            result_code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result_code == 0
    }
}

/// Projection of a reservation carried on the wire.
///
/// Only what the counterparty needs: identifiers, the slice coordinates (so
/// the receiver can create its local slice on first contact), the term and
/// resource set for the operation, and the per-direction sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationWire {
    pub rid: Id,
    pub slice_id: Id,
    pub slice_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<Term>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rset: Option<ResourceSet>,
    pub sequence: u64,
    /// Authority the ticket binds to, so the receiver knows where the lease
    /// will live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// Responder's reservation state, when the update reflects a terminal
    /// transition (a closed lease).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReservationState>,
}

/// Projection of a delegation carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationWire {
    pub did: Id,
    pub slice_id: Id,
    pub slice_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<serde_json::Value>,
    pub units: u64,
    pub rtype: ResourceType,
    pub sequence: u64,
    /// Responder's delegation state after the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DelegationState>,
}

/// Why an RPC failed without a protocol-level answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The transport rejected or could not deliver the message.
    TransportFailure,
    /// No response arrived before the request deadline.
    TransportTimeout,
    /// The actor stopped while the request was outstanding.
    Cancelled,
    /// The remote side reported a processing failure.
    Remote,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportFailure => "TransportFailure",
            Self::TransportTimeout => "TransportTimeout",
            Self::Cancelled => "Cancelled",
            Self::Remote => "Remote",
        }
    }
}

/// Payload of a `FailedRpc` message, synthetic or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRpcInfo {
    pub request_id: Id,
    pub failed_kind: RpcKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_id: Option<Id>,
    pub failure: FailureKind,
    pub error_details: String,
}

/// Payload variants of the message set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum RpcPayload {
    Reservation(ReservationWire),
    ReservationUpdate {
        reservation: ReservationWire,
        update: UpdateData,
    },
    Delegation(DelegationWire),
    DelegationUpdate {
        delegation: DelegationWire,
        update: UpdateData,
    },
    Query(BTreeMap<String, String>),
    QueryResult(BTreeMap<String, String>),
    Failed(FailedRpcInfo),
}

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    /// Globally unique per message; the consumer de-dup window keys on it.
    pub message_id: Id,
    /// For responses: the `message_id` of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Id>,
    pub kind: RpcKind,
    /// Topic the sender listens on for the response.
    pub callback_topic: String,
    pub auth: AuthToken,
    pub payload: RpcPayload,
}

impl RpcEnvelope {
    pub fn request(kind: RpcKind, callback_topic: impl Into<String>, auth: AuthToken, payload: RpcPayload) -> Self {
        Self {
            message_id: Id::new(),
            request_id: None,
            kind,
            callback_topic: callback_topic.into(),
            auth,
            payload,
        }
    }

    pub fn response(
        kind: RpcKind,
        request_id: Id,
        callback_topic: impl Into<String>,
        auth: AuthToken,
        payload: RpcPayload,
    ) -> Self {
        Self {
            message_id: Id::new(),
            request_id: Some(request_id),
            kind,
            callback_topic: callback_topic.into(),
            auth,
            payload,
        }
    }

    /// Reservation id the message refers to, when it refers to one.
    pub fn reservation_id(&self) -> Option<Id> {
        match &self.payload {
            RpcPayload::Reservation(r) | RpcPayload::ReservationUpdate { reservation: r, .. } => {
                Some(r.rid)
            }
            RpcPayload::Failed(f) => f.reservation_id,
            _ => None,
        }
    }

    /// Delegation id the message refers to, when it refers to one.
    pub fn delegation_id(&self) -> Option<Id> {
        match &self.payload {
            RpcPayload::Delegation(d) | RpcPayload::DelegationUpdate { delegation: d, .. } => {
                Some(d.did)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_pairing() {
        assert_eq!(RpcKind::Ticket.expected_response(), Some(RpcKind::UpdateTicket));
        assert_eq!(RpcKind::Redeem.expected_response(), Some(RpcKind::UpdateLease));
        assert_eq!(RpcKind::Query.expected_response(), Some(RpcKind::QueryResult));
        assert_eq!(RpcKind::Relinquish.expected_response(), None);
        assert_eq!(RpcKind::UpdateLease.expected_response(), None);
    }

    #[test]
    fn envelope_wire_round_trip() {
        let auth = AuthToken::new("orchestrator", Id::new());
        let wire = ReservationWire {
            rid: Id::new(),
            slice_id: Id::new(),
            slice_name: "s1".into(),
            term: Some(Term::new(0, 999).unwrap()),
            rset: Some(ResourceSet::request(2, ResourceType::from("vm"))),
            sequence: 1,
            authority: Some("site".into()),
            state: None,
        };
        let envelope = RpcEnvelope::request(
            RpcKind::Ticket,
            "orchestrator-topic",
            auth,
            RpcPayload::Reservation(wire),
        );
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: RpcEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.reservation_id(), envelope.reservation_id());
    }
}
