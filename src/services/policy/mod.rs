//! Reference policies and the static policy registry.
//!
//! Policies are resolved from config tokens through [`PolicyRegistry`];
//! unknown tokens fail at startup. The reference implementations cover the
//! three roles: client-side close scheduling, broker-side inventory
//! accounting, and authority-side unit assignment.

pub mod assignment;
pub mod client;
pub mod inventory;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{ActorClock, ActorRole};
use crate::domain::ports::Policy;

pub use assignment::AssignmentPolicy;
pub use client::ClientPolicy;
pub use inventory::InventoryPolicy;

/// Shared counters policies expose for observability and tests.
#[derive(Debug, Default)]
pub struct PolicyStats {
    /// Units assigned to leases.
    pub assigned: AtomicU64,
    /// Units freed by closed leases.
    pub freed: AtomicU64,
    /// Units currently allocatable from claimed inventory.
    pub allocatable: AtomicU64,
}

/// Constructor registered against a config token.
pub type PolicyCtor = fn(&ActorClock, Arc<PolicyStats>) -> Box<dyn Policy>;

/// Static token -> constructor map, built at startup.
pub struct PolicyRegistry {
    ctors: HashMap<String, PolicyCtor>,
}

impl PolicyRegistry {
    /// Registry with the built-in policies.
    pub fn builtin() -> Self {
        let mut ctors: HashMap<String, PolicyCtor> = HashMap::new();
        ctors.insert("client".into(), |clock, stats| {
            Box::new(ClientPolicy::new(*clock, stats))
        });
        ctors.insert("inventory".into(), |clock, stats| {
            Box::new(InventoryPolicy::new(*clock, stats))
        });
        ctors.insert("assignment".into(), |_clock, stats| {
            Box::new(AssignmentPolicy::new(stats))
        });
        Self { ctors }
    }

    pub fn register(&mut self, token: impl Into<String>, ctor: PolicyCtor) {
        self.ctors.insert(token.into(), ctor);
    }

    /// Resolve a token. `default` maps to the role's reference policy;
    /// anything unknown is a configuration error.
    pub fn build(
        &self,
        token: &str,
        role: ActorRole,
        clock: &ActorClock,
        stats: Arc<PolicyStats>,
    ) -> LatticeResult<Box<dyn Policy>> {
        let token = if token == "default" {
            match role {
                ActorRole::Orchestrator => "client",
                ActorRole::Broker => "inventory",
                ActorRole::Authority => "assignment",
            }
        } else {
            token
        };
        let ctor = self
            .ctors
            .get(token)
            .ok_or_else(|| LatticeError::InvalidArguments(format!("unknown policy token: {token}")))?;
        Ok(ctor(clock, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_fails_fast() {
        let registry = PolicyRegistry::builtin();
        let clock = ActorClock::default();
        let result = registry.build("no-such-policy", ActorRole::Broker, &clock, Arc::default());
        assert!(result.is_err());
    }

    #[test]
    fn default_maps_per_role() {
        let registry = PolicyRegistry::builtin();
        let clock = ActorClock::default();
        for role in [ActorRole::Orchestrator, ActorRole::Broker, ActorRole::Authority] {
            assert!(registry.build("default", role, &clock, Arc::default()).is_ok());
        }
    }
}
