//! Resource sets: the abstract and concrete halves of a reservation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::{Id, ResourceType};
use super::term::Term;
use super::unit::UnitSet;

/// Delegation evidence issued by a broker and consumed by an authority in a
/// redeem.
///
/// Tickets are immutable once issued. An extended or sub-delegated ticket
/// references its predecessor through `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub term: Term,
    pub units: u64,
    pub rtype: ResourceType,
    pub properties: BTreeMap<String, String>,
    /// Guid of the actor the ticket was issued to.
    pub holder: Id,
    /// The source delegation this ticket draws from.
    pub delegation_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Ticket>>,
}

impl Ticket {
    pub fn new(term: Term, units: u64, rtype: ResourceType, holder: Id, delegation_id: Id) -> Self {
        Self {
            term,
            units,
            rtype,
            properties: BTreeMap::new(),
            holder,
            delegation_id,
            source: None,
        }
    }

    /// Issue a successor ticket for an extension, recording this one as its
    /// source.
    pub fn extend(&self, term: Term, units: u64) -> Self {
        Self {
            term,
            units,
            rtype: self.rtype.clone(),
            properties: self.properties.clone(),
            holder: self.holder,
            delegation_id: self.delegation_id,
            source: Some(Box::new(self.clone())),
        }
    }
}

/// Concrete evidence behind a resource set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConcreteSet {
    /// A broker-issued promise of future resources.
    Ticket(Ticket),
    /// Authority-owned leased units.
    Units(UnitSet),
}

impl ConcreteSet {
    pub fn as_ticket(&self) -> Option<&Ticket> {
        match self {
            Self::Ticket(t) => Some(t),
            Self::Units(_) => None,
        }
    }

    pub fn as_units(&self) -> Option<&UnitSet> {
        match self {
            Self::Units(u) => Some(u),
            Self::Ticket(_) => None,
        }
    }

    pub fn as_units_mut(&mut self) -> Option<&mut UnitSet> {
        match self {
            Self::Units(u) => Some(u),
            Self::Ticket(_) => None,
        }
    }
}

/// Quantity of typed resources, optionally backed by concrete evidence.
///
/// Outbound abstract requests carry no concrete set; the responder attaches
/// one (ticket on the broker, unit set on the authority).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSet {
    pub units: u64,
    pub rtype: ResourceType,
    /// Opaque resource descriptor (sliver graph, VLAN request, ...) signed
    /// into tickets. The kernel never interprets it.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub sliver: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concrete: Option<ConcreteSet>,
}

impl ResourceSet {
    /// Abstract request for `units` resources of `rtype`.
    pub fn request(units: u64, rtype: ResourceType) -> Self {
        Self {
            units,
            rtype,
            sliver: serde_json::Value::Null,
            concrete: None,
        }
    }

    pub fn with_sliver(mut self, sliver: serde_json::Value) -> Self {
        self.sliver = sliver;
        self
    }

    /// Resource set carrying an issued ticket.
    pub fn with_ticket(ticket: Ticket) -> Self {
        Self {
            units: ticket.units,
            rtype: ticket.rtype.clone(),
            sliver: serde_json::Value::Null,
            concrete: Some(ConcreteSet::Ticket(ticket)),
        }
    }

    /// Resource set carrying leased units.
    pub fn with_units(rtype: ResourceType, units: UnitSet) -> Self {
        Self {
            units: units.len() as u64,
            rtype,
            sliver: serde_json::Value::Null,
            concrete: Some(ConcreteSet::Units(units)),
        }
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        self.concrete.as_ref().and_then(ConcreteSet::as_ticket)
    }

    pub fn unit_set(&self) -> Option<&UnitSet> {
        self.concrete.as_ref().and_then(ConcreteSet::as_units)
    }

    pub fn unit_set_mut(&mut self) -> Option<&mut UnitSet> {
        self.concrete.as_mut().and_then(ConcreteSet::as_units_mut)
    }

    pub fn is_abstract(&self) -> bool {
        self.concrete.is_none()
    }
}
