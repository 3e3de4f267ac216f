pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::detector::Operation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Connection(#[from] rusqlite::Error),
    #[error("Store operation failed: {0}")]
    Operation(String),
}

/// Durable per-(detector, transaction) progress records. Completed operations
/// only need to live long enough to deduplicate redelivered blocks; an
/// implementation is free to expire them after a bounded retention window.
pub trait OperationStore: Send + Sync {
    fn save_operation(&self, op: &Operation) -> Result<(), StoreError>;

    /// Returns `Ok(None)` when no (unexpired) record exists for the pair.
    fn get_operation(&self, detector_id: &str, tx_hash: &str)
        -> Result<Option<Operation>, StoreError>;
}

/// Durable pointer to the last fully consumed block.
pub trait BlockCursorStore: Send + Sync {
    /// Returns 0 when no cursor has ever been written.
    fn get_latest_block(&self) -> Result<u64, StoreError>;

    fn set_latest_block(&self, number: u64) -> Result<(), StoreError>;
}
