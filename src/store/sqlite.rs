use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::detector::Operation;
use crate::store::schema::initialize_schema;
use crate::store::{BlockCursorStore, OperationStore, StoreError};

/// SQLite-backed store for operations and the block cursor.
///
/// Completed operations carry an expiry timestamp; expired rows are invisible
/// to reads and purged opportunistically on the next write, which bounds
/// storage growth while preserving the deduplication window.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    retention_seconds: u64,
}

impl SqliteStore {
    pub fn new(path: &str, retention_seconds: u64) -> Result<Self, StoreError> {
        if path.is_empty() {
            return Self::new_in_memory(retention_seconds);
        }
        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention_seconds,
        })
    }

    /// In-memory store, used by tests.
    pub fn new_in_memory(retention_seconds: u64) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention_seconds,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Operation("Failed to acquire connection lock".to_string()))
    }
}

impl OperationStore for SqliteStore {
    fn save_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let expires_at = if op.done {
            Some(now + self.retention_seconds as i64)
        } else {
            None
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO operations
             (detector_id, tx_hash, block_number, state, done, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                op.detector_id,
                op.tx_hash,
                op.block_number as i64,
                op.state,
                op.done,
                expires_at
            ],
        )?;

        // Reclaim records past their deduplication window.
        conn.execute(
            "DELETE FROM operations WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;

        Ok(())
    }

    fn get_operation(
        &self,
        detector_id: &str,
        tx_hash: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        let op = conn
            .query_row(
                "SELECT detector_id, tx_hash, block_number, state, done FROM operations
                 WHERE detector_id = ?1 AND tx_hash = ?2
                 AND (expires_at IS NULL OR expires_at > ?3)",
                params![detector_id, tx_hash, now],
                |row| {
                    Ok(Operation {
                        detector_id: row.get(0)?,
                        tx_hash: row.get(1)?,
                        block_number: row.get::<_, i64>(2)? as u64,
                        state: row.get(3)?,
                        done: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(op)
    }
}

impl BlockCursorStore for SqliteStore {
    fn get_latest_block(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let number: Option<i64> = conn
            .query_row("SELECT number FROM block_cursor WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(number.unwrap_or(0) as u64)
    }

    fn set_latest_block(&self, number: u64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO block_cursor (id, number) VALUES (1, ?1)
             ON CONFLICT (id) DO UPDATE SET number = excluded.number",
            params![number as i64],
        )?;
        Ok(())
    }
}
