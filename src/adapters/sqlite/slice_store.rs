//! SQLite implementation of the `SliceStore` port.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{Id, ResourceType, Slice, SliceKind};
use crate::domain::ports::SliceStore;

#[derive(Clone)]
pub struct SqliteSliceStore {
    pool: SqlitePool,
}

impl SqliteSliceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(blob: &str) -> LatticeResult<Slice> {
    Ok(serde_json::from_str(blob)?)
}

#[async_trait]
impl SliceStore for SqliteSliceStore {
    async fn add_slice(&self, actor_id: Id, slice: &Slice) -> LatticeResult<()> {
        let blob = serde_json::to_string(slice)?;
        sqlx::query(
            "INSERT INTO slices (id, actor_id, name, kind, resource_type, blob)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(slice.id.to_string())
        .bind(actor_id.to_string())
        .bind(&slice.name)
        .bind(slice.kind.as_str())
        .bind(slice.resource_type.as_ref().map(|t| t.as_str().to_string()))
        .bind(&blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_slice(&self, actor_id: Id, slice: &Slice) -> LatticeResult<()> {
        let blob = serde_json::to_string(slice)?;
        let result = sqlx::query(
            "UPDATE slices SET name = ?, kind = ?, resource_type = ?, blob = ?
             WHERE actor_id = ? AND id = ?",
        )
        .bind(&slice.name)
        .bind(slice.kind.as_str())
        .bind(slice.resource_type.as_ref().map(|t| t.as_str().to_string()))
        .bind(&blob)
        .bind(actor_id.to_string())
        .bind(slice.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::NoSuchSlice(slice.id));
        }
        Ok(())
    }

    async fn remove_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<()> {
        let result = sqlx::query("DELETE FROM slices WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(slice_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::NoSuchSlice(slice_id));
        }
        Ok(())
    }

    async fn get_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<Option<Slice>> {
        let row = sqlx::query("SELECT blob FROM slices WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(slice_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(r.get::<String, _>("blob").as_str())).transpose()
    }

    async fn get_slices(&self, actor_id: Id) -> LatticeResult<Vec<Slice>> {
        let rows = sqlx::query("SELECT blob FROM slices WHERE actor_id = ? ORDER BY name")
            .bind(actor_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }

    async fn get_slices_by_kind(&self, actor_id: Id, kind: SliceKind) -> LatticeResult<Vec<Slice>> {
        let rows = sqlx::query("SELECT blob FROM slices WHERE actor_id = ? AND kind = ? ORDER BY name")
            .bind(actor_id.to_string())
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }

    async fn get_slices_by_resource_type(
        &self,
        actor_id: Id,
        rtype: &ResourceType,
    ) -> LatticeResult<Vec<Slice>> {
        let rows = sqlx::query(
            "SELECT blob FROM slices WHERE actor_id = ? AND resource_type = ? ORDER BY name",
        )
        .bind(actor_id.to_string())
        .bind(rtype.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }
}
