//! SQLite implementation of the `UnitStore` port.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{Id, Unit};
use crate::domain::ports::UnitStore;

#[derive(Clone)]
pub struct SqliteUnitStore {
    pool: SqlitePool,
}

impl SqliteUnitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(blob: &str) -> LatticeResult<Unit> {
    Ok(serde_json::from_str(blob)?)
}

#[async_trait]
impl UnitStore for SqliteUnitStore {
    async fn add_unit(&self, actor_id: Id, unit: &Unit, is_recovery: bool) -> LatticeResult<()> {
        let blob = serde_json::to_string(unit)?;
        let query = if is_recovery {
            // Recovery may re-insert units that survived the crash.
            "INSERT OR REPLACE INTO units (id, actor_id, reservation_id, slice_id, state, blob)
             VALUES (?, ?, ?, ?, ?, ?)"
        } else {
            "INSERT INTO units (id, actor_id, reservation_id, slice_id, state, blob)
             VALUES (?, ?, ?, ?, ?, ?)"
        };
        sqlx::query(query)
            .bind(unit.id.to_string())
            .bind(actor_id.to_string())
            .bind(unit.reservation_id.to_string())
            .bind(unit.slice_id.to_string())
            .bind(unit.state.as_str())
            .bind(&blob)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    LatticeError::InvalidArguments(format!("unit {} already exists", unit.id))
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn update_unit(&self, actor_id: Id, unit: &Unit) -> LatticeResult<()> {
        let blob = serde_json::to_string(unit)?;
        let result = sqlx::query(
            "UPDATE units SET reservation_id = ?, slice_id = ?, state = ?, blob = ?
             WHERE actor_id = ? AND id = ?",
        )
        .bind(unit.reservation_id.to_string())
        .bind(unit.slice_id.to_string())
        .bind(unit.state.as_str())
        .bind(&blob)
        .bind(actor_id.to_string())
        .bind(unit.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::InvalidArguments(format!("unit {} not found", unit.id)));
        }
        Ok(())
    }

    async fn remove_unit(&self, actor_id: Id, unit_id: Id) -> LatticeResult<()> {
        sqlx::query("DELETE FROM units WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(unit_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_unit(&self, actor_id: Id, unit_id: Id) -> LatticeResult<Option<Unit>> {
        let row = sqlx::query("SELECT blob FROM units WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(unit_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(r.get::<String, _>("blob").as_str())).transpose()
    }

    async fn get_units_by_reservation(&self, actor_id: Id, rid: Id) -> LatticeResult<Vec<Unit>> {
        let rows = sqlx::query(
            "SELECT blob FROM units WHERE actor_id = ? AND reservation_id = ? ORDER BY id",
        )
        .bind(actor_id.to_string())
        .bind(rid.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }
}
