//! SQLite reading store on a dedicated executor thread.
//!
//! All statements run on the single tokio-rusqlite thread, which also gives
//! the store its single-writer discipline: writes for any owner are applied in
//! submission order and never interleave.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::{LocalStore, Reading, SensorName, StoreResult};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        source_address TEXT NOT NULL,
        sensor_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        payload TEXT NOT NULL,
        stored_at INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_readings_unique
        ON readings(owner_id, sensor_id, timestamp, payload);
    CREATE INDEX IF NOT EXISTS idx_readings_owner_timestamp
        ON readings(owner_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_readings_exact
        ON readings(owner_id, source_address, timestamp, payload);

    CREATE TABLE IF NOT EXISTS role_preferences (
        identity TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sensor_names (
        sensor_id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
"#;

const INSERT_READING: &str = "INSERT OR IGNORE INTO readings \
     (owner_id, source_address, sensor_id, timestamp, payload, stored_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// SQLite-backed [`LocalStore`].
#[derive(Clone)]
pub struct SqliteReadingStore {
    conn: Connection,
}

impl SqliteReadingStore {
    /// Open (or create) a store file, enabling WAL and creating the schema.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Opening reading store");
        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// In-memory store. Useful for testing.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn call_sqlite<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.conn.call(move |conn| Ok(f(conn)?)).await?)
    }

    // ========================================================================
    // Role preferences
    // ========================================================================

    /// Last role the identity explicitly selected on this device.
    pub async fn role_preference(&self, identity: &str) -> StoreResult<Option<String>> {
        let identity = identity.to_string();
        self.call_sqlite(move |conn| {
            conn.query_row(
                "SELECT role FROM role_preferences WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    /// Remember the identity's selected role.
    pub async fn set_role_preference(&self, identity: &str, role: &str) -> StoreResult<()> {
        let identity = identity.to_string();
        let role = role.to_string();
        let now = Utc::now().timestamp_millis();
        self.call_sqlite(move |conn| {
            conn.execute(
                "INSERT INTO role_preferences (identity, role, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(identity) DO UPDATE SET role = excluded.role, updated_at = excluded.updated_at",
                params![identity, role, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn clear_role_preference(&self, identity: &str) -> StoreResult<()> {
        let identity = identity.to_string();
        self.call_sqlite(move |conn| {
            conn.execute(
                "DELETE FROM role_preferences WHERE identity = ?1",
                params![identity],
            )?;
            Ok(())
        })
        .await
    }

    // ========================================================================
    // Sensor display names
    // ========================================================================

    /// Insert or rename a sensor. `created_at` of an existing row is kept.
    pub async fn upsert_sensor_name(&self, sensor_id: &str, display_name: &str) -> StoreResult<()> {
        let sensor_id = sensor_id.to_string();
        let display_name = display_name.to_string();
        let now = Utc::now().timestamp_millis();
        self.call_sqlite(move |conn| {
            conn.execute(
                "INSERT INTO sensor_names (sensor_id, display_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(sensor_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     updated_at = excluded.updated_at",
                params![sensor_id, display_name, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn sensor_name(&self, sensor_id: &str) -> StoreResult<Option<SensorName>> {
        let sensor_id = sensor_id.to_string();
        self.call_sqlite(move |conn| {
            conn.query_row(
                "SELECT sensor_id, display_name, created_at, updated_at
                 FROM sensor_names WHERE sensor_id = ?1",
                params![sensor_id],
                sensor_name_from_row,
            )
            .optional()
        })
        .await
    }

    /// All named sensors, ordered by display name.
    pub async fn sensor_names(&self) -> StoreResult<Vec<SensorName>> {
        self.call_sqlite(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sensor_id, display_name, created_at, updated_at
                 FROM sensor_names ORDER BY display_name, sensor_id",
            )?;
            let names = stmt
                .query_map([], sensor_name_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }

    pub async fn delete_sensor_name(&self, sensor_id: &str) -> StoreResult<bool> {
        let sensor_id = sensor_id.to_string();
        self.call_sqlite(move |conn| {
            conn.execute(
                "DELETE FROM sensor_names WHERE sensor_id = ?1",
                params![sensor_id],
            )
        })
        .await
        .map(|n| n > 0)
    }

    pub async fn clear_sensor_names(&self) -> StoreResult<usize> {
        let deleted = self
            .call_sqlite(|conn| conn.execute("DELETE FROM sensor_names", []))
            .await?;
        debug!(deleted, "Cleared sensor names");
        Ok(deleted)
    }
}

fn sensor_name_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SensorName> {
    Ok(SensorName {
        sensor_id: row.get(0)?,
        display_name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[async_trait]
impl LocalStore for SqliteReadingStore {
    async fn insert(&self, reading: &Reading) -> StoreResult<bool> {
        let reading = reading.clone();
        let now = Utc::now().timestamp_millis();
        self.call_sqlite(move |conn| {
            let changed = conn.execute(
                INSERT_READING,
                params![
                    reading.owner_id,
                    reading.source_address,
                    reading.sensor_id,
                    reading.timestamp,
                    reading.payload,
                    now
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_all(&self, readings: &[Reading]) -> StoreResult<usize> {
        if readings.is_empty() {
            return Ok(0);
        }
        let readings = readings.to_vec();
        let now = Utc::now().timestamp_millis();
        let requested = readings.len();
        let inserted = self
            .call_sqlite(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare_cached(INSERT_READING)?;
                    for r in &readings {
                        inserted += stmt.execute(params![
                            r.owner_id,
                            r.source_address,
                            r.sensor_id,
                            r.timestamp,
                            r.payload,
                            now
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;

        debug!(requested, inserted, "Inserted readings batch");
        Ok(inserted)
    }

    async fn exists_exact(
        &self,
        owner_id: &str,
        source_address: &str,
        timestamp: i64,
        payload: &str,
    ) -> StoreResult<bool> {
        let (owner_id, source_address, payload) = (
            owner_id.to_string(),
            source_address.to_string(),
            payload.to_string(),
        );
        self.call_sqlite(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM readings
                 WHERE owner_id = ?1 AND source_address = ?2 AND timestamp = ?3 AND payload = ?4)",
                params![owner_id, source_address, timestamp, payload],
                |row| row.get::<_, bool>(0),
            )
        })
        .await
    }

    async fn max_timestamp_for(&self, owner_id: &str) -> StoreResult<i64> {
        let owner_id = owner_id.to_string();
        self.call_sqlite(move |conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(timestamp), 0) FROM readings WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn delete_where_owner_not_in(&self, owner_ids: &[String]) -> StoreResult<usize> {
        let owner_ids = owner_ids.to_vec();
        let deleted = self
            .call_sqlite(move |conn| {
                if owner_ids.is_empty() {
                    return conn.execute("DELETE FROM readings", []);
                }
                let placeholders = vec!["?"; owner_ids.len()].join(", ");
                let sql = format!(
                    "DELETE FROM readings WHERE owner_id NOT IN ({})",
                    placeholders
                );
                conn.execute(&sql, params_from_iter(owner_ids.iter()))
            })
            .await?;

        info!(deleted, "Purged readings of owners outside the kept set");
        Ok(deleted)
    }

    async fn clear_all(&self) -> StoreResult<usize> {
        let deleted = self
            .call_sqlite(|conn| conn.execute("DELETE FROM readings", []))
            .await?;
        info!(deleted, "Cleared local readings");
        Ok(deleted)
    }

    async fn count_for_owner(&self, owner_id: &str) -> StoreResult<usize> {
        let owner_id = owner_id.to_string();
        self.call_sqlite(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as usize)
    }

    async fn count_all(&self) -> StoreResult<usize> {
        self.call_sqlite(|conn| {
            conn.query_row("SELECT COUNT(*) FROM readings", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .await
        .map(|n| n as usize)
    }

    async fn readings_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Reading>> {
        let owner_id = owner_id.to_string();
        self.call_sqlite(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT source_address, sensor_id, timestamp, payload, owner_id
                 FROM readings WHERE owner_id = ?1 ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map(params![owner_id], |row| {
                Ok(Reading {
                    source_address: row.get(0)?,
                    sensor_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    payload: row.get(3)?,
                    owner_id: row.get(4)?,
                })
            })?;

            let mut readings = Vec::new();
            for row in rows {
                readings.push(row?);
            }
            Ok(readings)
        })
        .await
    }
}
