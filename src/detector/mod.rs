pub mod large_transfer;
pub mod operation;
pub mod pool;

pub use large_transfer::LargeTransferDetector;
pub use operation::Operation;
pub use pool::DetectorPool;

use async_trait::async_trait;
use thiserror::Error;

use crate::blockchain::rpc_client::{Block, RpcError, Transaction};

#[derive(Error, Debug)]
pub enum DetectorError {
    /// Explicit decline: the detector wants nothing recorded for this
    /// transaction. Not a failure.
    #[error("Detector ignores the transaction")]
    Ignore,
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("Event decoding failed: {0}")]
    Decode(String),
    #[error("Notification failed: {0}")]
    Notify(String),
}

/// A transaction handler with a bounded multi-step protocol, driven by the
/// `DetectorPool` over every transaction of every block.
///
/// The pool calls `should_skip` first; when it returns false the pool loads
/// (or creates) the detector's `Operation` for the transaction, primes the
/// detector with `begin`, then alternates `advance`/`process` until `advance`
/// declines, committing one state increment per completed step. Detectors
/// declare their own step count through `advance`; most use a single step.
#[async_trait]
pub trait Detector: Send {
    /// Stable identity, used as the operation partition key.
    fn id(&self) -> &str;

    /// Cheap pre-filter (typically a bloom test) run before any operation
    /// state is loaded. Returning true means the detector has no interest in
    /// this transaction at all.
    fn should_skip(&self, block: &Block, tx: &Transaction) -> bool;

    /// Prime the detector with the persisted state for this pair (a fresh
    /// operation carries state 0).
    fn begin(&mut self, op: &Operation, tx: &Transaction);

    /// Advance the internal step counter; returns whether another `process`
    /// step should run.
    fn advance(&mut self) -> bool;

    /// Perform one step's work. May signal `DetectorError::Ignore` to decline
    /// the transaction without leaving a record.
    async fn process(&mut self, block: &Block, tx: &Transaction) -> Result<(), DetectorError>;
}
