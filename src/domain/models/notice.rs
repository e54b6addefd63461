//! Accumulated human-readable notices on reservations, delegations and units.

use serde::{Deserialize, Serialize};

/// Ordered list of notices recorded against an entity.
///
/// Notices are safe to surface to the counterparty; protocol updates carry
/// the joined rendering in their `message` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notice {
    entries: Vec<String>,
}

impl Notice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !message.is_empty() {
            self.entries.push(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All notices joined into one displayable string.
    pub fn joined(&self) -> String {
        self.entries.join("; ")
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.joined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_messages_are_dropped() {
        let mut notice = Notice::new();
        notice.add("");
        assert!(notice.is_empty());
        notice.add("ticket rejected");
        notice.add("closed by client");
        assert_eq!(notice.joined(), "ticket rejected; closed by client");
    }
}
