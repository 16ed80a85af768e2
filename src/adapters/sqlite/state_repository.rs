//! SQLite implementation of the StateStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::StateStore;

#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn write_state(&self, key: &str, snapshot: &serde_json::Value) -> DomainResult<()> {
        let snapshot_json = serde_json::to_string(snapshot)?;

        sqlx::query(
            r#"INSERT INTO arbiter_state (key, snapshot, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET snapshot = excluded.snapshot,
                                              updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(&snapshot_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_state(&self, key: &str) -> DomainResult<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT snapshot FROM arbiter_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(json,)| serde_json::from_str::<serde_json::Value>(&json).map_err(DomainError::from))
            .transpose()
    }

    async fn list_keys(&self) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM arbiter_state ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}
