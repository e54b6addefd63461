//! SQLite implementation of the `ReservationStore` port.
//!
//! The blob column holds the serialized reservation verbatim; re-serializing
//! an unmutated reservation must reproduce it byte for byte, which is why
//! the models use ordered maps throughout.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{Id, Reservation, ReservationCategory, ReservationState};
use crate::domain::ports::ReservationStore;

#[derive(Clone)]
pub struct SqliteReservationStore {
    pool: SqlitePool,
}

impl SqliteReservationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(blob: &str) -> LatticeResult<Reservation> {
    Ok(serde_json::from_str(blob)?)
}

#[async_trait]
impl ReservationStore for SqliteReservationStore {
    async fn add_reservation(&self, actor_id: Id, reservation: &Reservation) -> LatticeResult<()> {
        let blob = serde_json::to_string(reservation)?;
        sqlx::query(
            "INSERT INTO reservations (id, actor_id, slice_id, category, state, pending, blob)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reservation.id.to_string())
        .bind(actor_id.to_string())
        .bind(reservation.slice_id.to_string())
        .bind(reservation.category.as_str())
        .bind(reservation.state.as_str())
        .bind(reservation.pending.as_str())
        .bind(&blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_reservation(&self, actor_id: Id, reservation: &Reservation) -> LatticeResult<()> {
        let blob = serde_json::to_string(reservation)?;
        let result = sqlx::query(
            "UPDATE reservations SET slice_id = ?, category = ?, state = ?, pending = ?, blob = ?
             WHERE actor_id = ? AND id = ?",
        )
        .bind(reservation.slice_id.to_string())
        .bind(reservation.category.as_str())
        .bind(reservation.state.as_str())
        .bind(reservation.pending.as_str())
        .bind(&blob)
        .bind(actor_id.to_string())
        .bind(reservation.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::NoSuchReservation(reservation.id));
        }
        Ok(())
    }

    async fn remove_reservation(&self, actor_id: Id, rid: Id) -> LatticeResult<()> {
        let result = sqlx::query("DELETE FROM reservations WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(rid.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LatticeError::NoSuchReservation(rid));
        }
        Ok(())
    }

    async fn get_reservation(&self, actor_id: Id, rid: Id) -> LatticeResult<Option<Reservation>> {
        let row = sqlx::query("SELECT blob FROM reservations WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(rid.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(r.get::<String, _>("blob").as_str())).transpose()
    }

    async fn get_reservations_by_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT blob FROM reservations WHERE actor_id = ? AND slice_id = ? ORDER BY id",
        )
        .bind(actor_id.to_string())
        .bind(slice_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }

    async fn get_reservations_by_state(
        &self,
        actor_id: Id,
        state: ReservationState,
    ) -> LatticeResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT blob FROM reservations WHERE actor_id = ? AND state = ? ORDER BY id",
        )
        .bind(actor_id.to_string())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }

    async fn get_reservations_by_category(
        &self,
        actor_id: Id,
        category: ReservationCategory,
    ) -> LatticeResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT blob FROM reservations WHERE actor_id = ? AND category = ? ORDER BY id",
        )
        .bind(actor_id.to_string())
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<String, _>("blob").as_str()))
            .collect()
    }

    async fn get_reservation_blob(&self, actor_id: Id, rid: Id) -> LatticeResult<Option<String>> {
        let row = sqlx::query("SELECT blob FROM reservations WHERE actor_id = ? AND id = ?")
            .bind(actor_id.to_string())
            .bind(rid.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("blob")))
    }
}
