//! RPC dispatch layer: outbound requests, inbound fan-in, correlation,
//! timeouts, and failure propagation.

pub mod manager;

pub use manager::{RpcManager, RpcManagerConfig};
