use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::db::store::{Snapshot, SnapshotError, SnapshotMeta, SnapshotStore};
use crate::remote::{FieldMap, RemoteEntity};

/// SQLite-backed snapshot store.
///
/// One database file can hold snapshots for several caches; each store
/// instance reads and writes only the rows of its own `scope`.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    scope: String,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database file and its tables
    pub async fn new(database_path: &Path, scope: &str) -> Result<Self, SnapshotError> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path.display());
        info!("Connecting to snapshot store {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let store = SqliteSnapshotStore {
            pool,
            scope: scope.to_string(),
        };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_entities (
                scope TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                record_id TEXT NOT NULL,
                fields_json TEXT NOT NULL,
                PRIMARY KEY (scope, natural_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_meta (
                scope TEXT PRIMARY KEY,
                last_update TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                total_records INTEGER NOT NULL,
                unique_keys INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SnapshotError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SnapshotError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

#[async_trait::async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshot_entities WHERE scope = ?")
            .bind(&self.scope)
            .execute(&mut *tx)
            .await?;

        for (natural_key, entity) in &snapshot.entities {
            let fields_json = serde_json::to_string(&entity.fields)?;
            sqlx::query(
                r#"
                INSERT INTO snapshot_entities (scope, natural_key, record_id, fields_json)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&self.scope)
            .bind(natural_key)
            .bind(&entity.record_id)
            .bind(fields_json)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO snapshot_meta (scope, last_update, saved_at, total_records, unique_keys)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(scope) DO UPDATE SET
                last_update = excluded.last_update,
                saved_at = excluded.saved_at,
                total_records = excluded.total_records,
                unique_keys = excluded.unique_keys
            "#,
        )
        .bind(&self.scope)
        .bind(snapshot.meta.last_update.to_rfc3339())
        .bind(snapshot.meta.saved_at.to_rfc3339())
        .bind(snapshot.meta.total_records as i64)
        .bind(snapshot.meta.unique_keys as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Saved snapshot '{}' with {} entities",
            self.scope,
            snapshot.entities.len()
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let meta_row = sqlx::query(
            r#"
            SELECT last_update, saved_at, total_records, unique_keys
            FROM snapshot_meta
            WHERE scope = ?
            "#,
        )
        .bind(&self.scope)
        .fetch_optional(&self.pool)
        .await?;

        let Some(meta_row) = meta_row else {
            return Ok(None);
        };

        let meta = SnapshotMeta {
            last_update: parse_timestamp(&meta_row.get::<String, _>("last_update"))?,
            saved_at: parse_timestamp(&meta_row.get::<String, _>("saved_at"))?,
            total_records: meta_row.get::<i64, _>("total_records").max(0) as usize,
            unique_keys: meta_row.get::<i64, _>("unique_keys").max(0) as usize,
        };

        let rows = sqlx::query(
            r#"
            SELECT natural_key, record_id, fields_json
            FROM snapshot_entities
            WHERE scope = ?
            "#,
        )
        .bind(&self.scope)
        .fetch_all(&self.pool)
        .await?;

        let mut entities = HashMap::with_capacity(rows.len());
        for row in rows {
            let fields: FieldMap = serde_json::from_str(&row.get::<String, _>("fields_json"))?;
            entities.insert(
                row.get::<String, _>("natural_key"),
                RemoteEntity::new(row.get::<String, _>("record_id"), fields),
            );
        }

        Ok(Some(Snapshot { entities, meta }))
    }

    async fn delete(&self) -> Result<(), SnapshotError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshot_entities WHERE scope = ?")
            .bind(&self.scope)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshot_meta WHERE scope = ?")
            .bind(&self.scope)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Deleted snapshot '{}'", self.scope);
        Ok(())
    }
}
