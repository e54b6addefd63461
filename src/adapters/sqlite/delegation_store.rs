//! SQLite implementation of the `DelegationStore` port.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{Delegation, Id};
use crate::domain::ports::DelegationStore;

#[derive(Clone)]
pub struct SqliteDelegationStore {
    pool: SqlitePool,
}

impl SqliteDelegationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(blob: &str) -> LatticeResult<Delegation> {
    Ok(serde_json::from_str(blob)?)
}

#[async_trait]
impl DelegationStore for SqliteDelegationStore {
    async fn add_delegation(&self, actor_id: Id, delegation: &Delegation) -> LatticeResult<()> {
        let blob = serde_json::to_string(delegation)?;
        sqlx::query(
            "INSERT INTO delegations (id, actor_id, slice_id, state, blob)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(delegation.id.to_string())
        .bind(actor_id.to_string())
        .bind(delegation.slice_id.to_string())
        .bind(delegation.state.as_str())
        .bind(&blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_delegation(&self, actor_id: Id, delegation: &Delegation) -> LatticeResult<()> {
        let blob = serde_json::to_string(delegation)?;
        let result = sqlx::query(
            "UPDATE delegations SET slice_id = ?, state = ?, blob = ?
             WHERE actor_id = ? AND id = ?",
        )
        .bind(delegation.slice_id.to_string())
        .bind(delegation.state.as_str())
        .bind(&blob)
        .bind(actor_id.to_string())
        .bind(delegation.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::NoSuchDelegation(delegation.id));
        }
        Ok(())
    }

    async fn remove_delegation(&self, actor_id: Id, did: Id) -> LatticeResult<()> {
        let result = sqlx::query("DELETE FROM delegations WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(did.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::NoSuchDelegation(did));
        }
        Ok(())
    }

    async fn get_delegation(&self, actor_id: Id, did: Id) -> LatticeResult<Option<Delegation>> {
        let row = sqlx::query("SELECT blob FROM delegations WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(did.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(r.get::<String, _>("blob").as_str())).transpose()
    }

    async fn get_delegations_by_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<Vec<Delegation>> {
        let rows = sqlx::query(
            "SELECT blob FROM delegations WHERE actor_id = ? AND slice_id = ? ORDER BY id",
        )
        .bind(actor_id.to_string())
        .bind(slice_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }
}
