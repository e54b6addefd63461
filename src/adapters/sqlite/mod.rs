//! SQLite persistence adapters for the lattice control framework.

pub mod connection;
pub mod container_store;
pub mod delegation_store;
pub mod reservation_store;
pub mod slice_store;
pub mod unit_store;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::domain::models::Id;
use crate::domain::ports::Stores;

pub use connection::{create_pool, create_test_pool, run_migrations, ConnectionError, PoolConfig};
pub use container_store::SqliteContainerStore;
pub use delegation_store::SqliteDelegationStore;
pub use reservation_store::SqliteReservationStore;
pub use slice_store::SqliteSliceStore;
pub use unit_store::SqliteUnitStore;

/// Store bundle for one actor, backed by a shared container pool.
pub fn stores_for_actor(pool: &SqlitePool, actor_id: Id) -> Stores {
    Stores {
        actor_id,
        slices: Arc::new(SqliteSliceStore::new(pool.clone())),
        reservations: Arc::new(SqliteReservationStore::new(pool.clone())),
        delegations: Arc::new(SqliteDelegationStore::new(pool.clone())),
        units: Arc::new(SqliteUnitStore::new(pool.clone())),
        container: Arc::new(SqliteContainerStore::new(pool.clone())),
    }
}
