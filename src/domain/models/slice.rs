//! Slice domain model.
//!
//! A slice groups the reservations (and delegations) that share an owner
//! and configuration. Inventory slices exist on brokers and authorities;
//! client and broker-client slices on orchestrators and brokers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::auth::AuthToken;
use super::id::{Id, ResourceType};

/// What a slice holds, which constrains where it may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    /// Source inventory on a broker or authority.
    Inventory,
    /// End-user reservations on an orchestrator or broker.
    Client,
    /// Reservations a broker holds on behalf of downstream clients.
    BrokerClient,
}

impl SliceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Client => "client",
            Self::BrokerClient => "broker_client",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inventory" => Some(Self::Inventory),
            "client" => Some(Self::Client),
            "broker_client" => Some(Self::BrokerClient),
            _ => None,
        }
    }

    pub fn is_inventory(&self) -> bool {
        matches!(self, Self::Inventory)
    }

    pub fn is_client(&self) -> bool {
        !self.is_inventory()
    }
}

/// Container for reservations that share configuration.
///
/// Owns its reservations and delegations by id; the kernel table owns the
/// objects themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub id: Id,
    /// Globally unique per actor.
    pub name: String,
    pub owner: AuthToken,
    pub kind: SliceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    pub config_props: BTreeMap<String, String>,
    pub local_props: BTreeMap<String, String>,
    pub request_props: BTreeMap<String, String>,
    pub resource_props: BTreeMap<String, String>,
    /// Ids of reservations registered under this slice.
    pub reservations: BTreeSet<Id>,
    /// Ids of delegations registered under this slice.
    pub delegations: BTreeSet<Id>,
}

impl Slice {
    pub fn new(name: impl Into<String>, owner: AuthToken, kind: SliceKind) -> Self {
        Self {
            id: Id::new(),
            name: name.into(),
            owner,
            kind,
            resource_type: None,
            config_props: BTreeMap::new(),
            local_props: BTreeMap::new(),
            request_props: BTreeMap::new(),
            resource_props: BTreeMap::new(),
            reservations: BTreeSet::new(),
            delegations: BTreeSet::new(),
        }
    }

    pub fn with_resource_type(mut self, rtype: ResourceType) -> Self {
        self.resource_type = Some(rtype);
        self
    }

    pub fn with_config_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_props.insert(key.into(), value.into());
        self
    }

    pub fn is_inventory(&self) -> bool {
        self.kind.is_inventory()
    }

    /// Whether the slice can be unregistered: nothing registered under it.
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty() && self.delegations.is_empty()
    }
}

impl std::fmt::Display for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slice {}({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> AuthToken {
        AuthToken::new("orchestrator", Id::new())
    }

    #[test]
    fn kind_string_round_trip() {
        for kind in [SliceKind::Inventory, SliceKind::Client, SliceKind::BrokerClient] {
            assert_eq!(SliceKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(SliceKind::from_str("bogus"), None);
    }

    #[test]
    fn empty_tracks_registrations() {
        let mut slice = Slice::new("s1", owner(), SliceKind::Client);
        assert!(slice.is_empty());
        let rid = Id::new();
        slice.reservations.insert(rid);
        assert!(!slice.is_empty());
        slice.reservations.remove(&rid);
        assert!(slice.is_empty());
    }
}
