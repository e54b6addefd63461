//! Delegations: inventory handed from an authority to a broker.

use serde::{Deserialize, Serialize};

use super::auth::AuthToken;
use super::id::{Id, ResourceType};
use super::notice::Notice;

/// Inventory-handoff lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationState {
    Nascent,
    Delegated,
    Reclaimed,
    Closed,
    Failed,
}

impl DelegationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nascent => "nascent",
            Self::Delegated => "delegated",
            Self::Reclaimed => "reclaimed",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "nascent" => Some(Self::Nascent),
            "delegated" => Some(Self::Delegated),
            "reclaimed" => Some(Self::Reclaimed),
            "closed" => Some(Self::Closed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Grant of inventory from one actor to another.
///
/// Carries the resource-graph model brokers split into tickets. The graph is
/// opaque to the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Id,
    pub slice_id: Id,
    pub state: DelegationState,
    /// Opaque resource-graph model describing the delegated inventory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<serde_json::Value>,
    /// Units of inventory described by the graph.
    pub units: u64,
    pub rtype: ResourceType,
    /// Identity of the delegating actor.
    pub owner: AuthToken,
    /// Broker that claimed this delegation, once claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<AuthToken>,
    pub sequence_in: u64,
    pub sequence_out: u64,
    pub notices: Notice,

    #[serde(skip)]
    pub dirty: bool,
}

impl Delegation {
    pub fn new(slice_id: Id, owner: AuthToken, units: u64, rtype: ResourceType) -> Self {
        Self {
            id: Id::new(),
            slice_id,
            state: DelegationState::Nascent,
            graph: None,
            units,
            rtype,
            owner,
            holder: None,
            sequence_in: 0,
            sequence_out: 0,
            notices: Notice::new(),
            dirty: false,
        }
    }

    pub fn with_graph(mut self, graph: serde_json::Value) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn transition(&mut self, state: DelegationState) {
        tracing::debug!(
            did = %self.id,
            from = self.state.as_str(),
            to = state.as_str(),
            "delegation transition"
        );
        self.state = state;
        self.dirty = true;
    }

    /// Claimed by a broker: record the holder and mark delegated.
    pub fn claim(&mut self, holder: AuthToken) {
        self.holder = Some(holder);
        self.transition(DelegationState::Delegated);
    }

    /// Returned to the delegating actor's inventory.
    pub fn reclaim(&mut self) {
        self.holder = None;
        self.transition(DelegationState::Reclaimed);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.notices.add(message);
        self.transition(DelegationState::Failed);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn next_sequence_out(&mut self) -> u64 {
        self.sequence_out += 1;
        self.dirty = true;
        self.sequence_out
    }
}

impl std::fmt::Display for Delegation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delegation {} [{}]", self.id, self.state.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_reclaim() {
        let owner = AuthToken::new("authority", Id::new());
        let broker = AuthToken::new("broker", Id::new());
        let mut d = Delegation::new(Id::new(), owner, 10, ResourceType::from("vm"));
        assert_eq!(d.state, DelegationState::Nascent);

        d.claim(broker.clone());
        assert_eq!(d.state, DelegationState::Delegated);
        assert_eq!(d.holder.as_ref(), Some(&broker));

        d.reclaim();
        assert_eq!(d.state, DelegationState::Reclaimed);
        assert!(d.holder.is_none());
    }
}
