//! Application services: the actor kernel, RPC layer, registries,
//! container wiring, and reference policies.

pub mod container;
pub mod kernel;
pub mod policy;
pub mod proxy;
pub mod registry;
pub mod rpc;

pub use container::Container;
pub use kernel::{Actor, ActorHandle};
pub use registry::{ActorRegistry, ProxyRegistry};
pub use rpc::RpcManager;
