//! Caller identity attached to every cross-actor message.

use serde::{Deserialize, Serialize};

use super::id::Id;

/// Identity of an actor or end user making a call.
///
/// Travels with every protocol message; the receiving kernel validates it
/// against the reservation's recorded client before accepting mutating
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Human-readable, globally unique actor name.
    pub name: String,
    /// Globally unique identifier.
    pub guid: Id,
    /// OIDC subject claim, when the caller authenticated through OIDC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthToken {
    pub fn new(name: impl Into<String>, guid: Id) -> Self {
        Self {
            name: name.into(),
            guid,
            oidc_sub: None,
            email: None,
        }
    }

    pub fn with_oidc(mut self, sub: impl Into<String>, email: impl Into<String>) -> Self {
        self.oidc_sub = Some(sub.into());
        self.email = Some(email.into());
        self
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.guid)
    }
}
