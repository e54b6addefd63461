//! The actor kernel: event loop, state machines, role handlers, recovery.

pub mod actor;
pub mod authority;
pub mod broker;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod wrapper;

pub use actor::{Actor, ActorHandle};
pub use events::ActorEvent;
