//! Lattice - control-framework core for a federated resource-leasing fabric
//!
//! Three actor roles (orchestrator, broker, authority) negotiate
//! time-bounded leases over typed resources:
//! - Per-actor single-task event/tick scheduler
//! - Reservation and delegation state machines with pending-operation gating
//! - Ticket/lease protocol (redeem, extend, modify, close, relinquish)
//! - RPC dispatch with request/response correlation, timeouts, retries
//! - Recovery from a SQLite store, restarting in-flight actions

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{LatticeError, LatticeResult};
pub use services::container::Container;
pub use services::kernel::ActorHandle;
