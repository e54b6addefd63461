//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! defaults -> project yaml -> local yaml -> environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
