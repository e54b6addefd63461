//! Units: individual leased resource instances and their lifecycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::{Id, ResourceType};
use super::notice::Notice;

/// Lifecycle of one leased unit.
///
/// `Default -> Priming -> Active -> (Modifying -> Active)* -> Closing ->
/// Closed`; any state may transition to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Default,
    Priming,
    Active,
    Modifying,
    Closing,
    Closed,
    Failed,
}

impl Default for UnitState {
    fn default() -> Self {
        Self::Default
    }
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Priming => "priming",
            Self::Active => "active",
            Self::Modifying => "modifying",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// In a configuration action that has not completed yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Default | Self::Priming | Self::Modifying | Self::Closing)
    }
}

/// Configuration action dispatched to the external handler for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigAction {
    Join,
    Modify,
    Leave,
}

impl ConfigAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Modify => "modify",
            Self::Leave => "leave",
        }
    }
}

/// One allocatable resource instance with its own configuration lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Id,
    pub reservation_id: Id,
    pub slice_id: Id,
    pub actor_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    pub rtype: ResourceType,
    pub state: UnitState,
    /// Incremented for every configuration action dispatched to the external
    /// handler; the handler must be idempotent per `(unit id, sequence)`.
    pub sequence: u64,
    pub properties: BTreeMap<String, String>,
    pub notices: Notice,
}

impl Unit {
    pub fn new(reservation_id: Id, slice_id: Id, actor_id: Id, rtype: ResourceType) -> Self {
        Self {
            id: Id::new(),
            reservation_id,
            slice_id,
            actor_id,
            parent_id: None,
            rtype,
            state: UnitState::Default,
            sequence: 0,
            properties: BTreeMap::new(),
            notices: Notice::new(),
        }
    }

    /// Next configuration sequence number, recorded on the unit.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Begin priming. Only legal from `Default` or when already priming
    /// (recovery restart).
    pub fn start_prime(&mut self) -> bool {
        if matches!(self.state, UnitState::Default | UnitState::Priming) {
            self.state = UnitState::Priming;
            return true;
        }
        false
    }

    /// Begin a modify. Only legal from `Active` or when already modifying.
    pub fn start_modify(&mut self) -> bool {
        if matches!(self.state, UnitState::Active | UnitState::Modifying) {
            self.state = UnitState::Modifying;
            return true;
        }
        false
    }

    pub fn start_close(&mut self) {
        if !self.state.is_terminal() {
            self.state = UnitState::Closing;
        }
    }

    pub fn activate(&mut self) {
        self.state = UnitState::Active;
    }

    pub fn close(&mut self) {
        self.state = UnitState::Closed;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.notices.add(message);
        self.state = UnitState::Failed;
    }

    /// A modify failed: the unit stays usable under its prior configuration.
    pub fn fail_on_modify(&mut self, message: impl Into<String>) {
        self.notices.add(message);
        self.state = UnitState::Active;
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Merge incoming properties; existing entries win.
    pub fn merge_properties(&mut self, incoming: &BTreeMap<String, String>) {
        for (key, value) in incoming {
            self.properties.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// The mapping `id -> Unit` held by an authority-side reservation.
///
/// Mutable only through the authority that owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitSet {
    units: BTreeMap<Id, Unit>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, unit: Unit) {
        self.units.insert(unit.id, unit);
    }

    pub fn get(&self, id: &Id) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Unit> {
        self.units.get_mut(id)
    }

    pub fn remove(&mut self, id: &Id) -> Option<Unit> {
        self.units.remove(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.units.values_mut()
    }

    /// Whether any unit is still mid-configuration.
    pub fn has_pending(&self) -> bool {
        self.units.values().any(|u| u.state.is_pending())
    }

    pub fn active_count(&self) -> u64 {
        self.units.values().filter(|u| u.state == UnitState::Active).count() as u64
    }

    pub fn failed_count(&self) -> u64 {
        self.units.values().filter(|u| u.state == UnitState::Failed).count() as u64
    }

    pub fn closed_count(&self) -> u64 {
        self.units.values().filter(|u| u.state == UnitState::Closed).count() as u64
    }
}

impl IntoIterator for UnitSet {
    type Item = Unit;
    type IntoIter = std::collections::btree_map::IntoValues<Id, Unit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Unit {
        Unit::new(Id::new(), Id::new(), Id::new(), ResourceType::from("vm"))
    }

    #[test]
    fn priming_lifecycle() {
        let mut u = unit();
        assert!(u.start_prime());
        assert_eq!(u.state, UnitState::Priming);
        // restartable while priming
        assert!(u.start_prime());
        u.activate();
        assert!(!u.start_prime());
        assert!(u.start_modify());
        u.activate();
        u.start_close();
        assert_eq!(u.state, UnitState::Closing);
        u.close();
        assert!(u.state.is_terminal());
    }

    #[test]
    fn fail_on_modify_returns_to_active() {
        let mut u = unit();
        u.start_prime();
        u.activate();
        u.start_modify();
        u.fail_on_modify("handler rejected");
        assert_eq!(u.state, UnitState::Active);
        assert!(!u.notices.is_empty());
    }

    #[test]
    fn sequence_increments_per_action() {
        let mut u = unit();
        assert_eq!(u.next_sequence(), 1);
        assert_eq!(u.next_sequence(), 2);
    }

    #[test]
    fn set_aggregates() {
        let mut set = UnitSet::new();
        let mut a = unit();
        a.start_prime();
        let mut b = unit();
        b.start_prime();
        b.activate();
        set.add(a);
        set.add(b);
        assert!(set.has_pending());
        assert_eq!(set.active_count(), 1);
        for u in set.iter_mut() {
            u.activate();
        }
        assert!(!set.has_pending());
        assert_eq!(set.active_count(), 2);
    }
}
