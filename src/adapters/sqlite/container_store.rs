//! SQLite implementation of the `ContainerStore` port.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::LatticeResult;
use crate::domain::models::Id;
use crate::domain::ports::{ActorRecord, ClientRecord, ContainerStore};

#[derive(Clone)]
pub struct SqliteContainerStore {
    pool: SqlitePool,
}

impl SqliteContainerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContainerStore for SqliteContainerStore {
    async fn add_actor(&self, record: &ActorRecord) -> LatticeResult<()> {
        sqlx::query("INSERT OR REPLACE INTO actors (guid, name, role) VALUES (?, ?, ?)")
            .bind(record.guid.to_string())
            .bind(&record.name)
            .bind(&record.role)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_actors(&self) -> LatticeResult<Vec<ActorRecord>> {
        let rows = sqlx::query("SELECT guid, name, role FROM actors ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let guid = Id::parse(&r.get::<String, _>("guid"))?;
                Some(ActorRecord {
                    guid,
                    name: r.get("name"),
                    role: r.get("role"),
                })
            })
            .collect())
    }

    async fn remove_actor(&self, guid: Id) -> LatticeResult<()> {
        sqlx::query("DELETE FROM actors WHERE guid = ?")
            .bind(guid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_client(&self, actor_id: Id, client: &ClientRecord) -> LatticeResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO clients (guid, actor_id, name, topic) VALUES (?, ?, ?, ?)",
        )
        .bind(client.guid.to_string())
        .bind(actor_id.to_string())
        .bind(&client.name)
        .bind(&client.topic)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_client(&self, actor_id: Id, guid: Id) -> LatticeResult<Option<ClientRecord>> {
        let row = sqlx::query("SELECT guid, name, topic FROM clients WHERE actor_id = ? AND guid = ?")
            .bind(actor_id.to_string())
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let guid = Id::parse(&r.get::<String, _>("guid"))?;
            Some(ClientRecord {
                guid,
                name: r.get("name"),
                topic: r.get("topic"),
            })
        }))
    }

    async fn remove_client(&self, actor_id: Id, guid: Id) -> LatticeResult<()> {
        sqlx::query("DELETE FROM clients WHERE actor_id = ? AND guid = ?")
            .bind(actor_id.to_string())
            .bind(guid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_misc(&self, key: &str, value: &str) -> LatticeResult<()> {
        sqlx::query("INSERT OR REPLACE INTO miscellaneous (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_misc(&self, key: &str) -> LatticeResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM miscellaneous WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}
