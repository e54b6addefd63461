//! Transport adapters.

pub mod memory_bus;

pub use memory_bus::MemoryBus;
