use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;
use tokio::time::sleep;

use crate::blockchain::poller::{ChainPoller, PollerError};
use crate::blockchain::rpc_client::{Block, NodeClient};
use crate::detector::DetectorPool;
use crate::store::{BlockCursorStore, StoreError};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Poller error: {0}")]
    Poller(#[from] PollerError),
}

/// Drives the pipeline: receives ordered blocks from the poller, routes every
/// transaction through the detector pool, and commits the block cursor once a
/// block fully succeeds.
///
/// A block that fails anywhere is retried in its entirety, indefinitely, with
/// a fixed backoff. The cursor only ever records fully processed blocks, so a
/// crash resumes at the failed block and the store's operation records make
/// the redelivery harmless.
pub struct BlockConsumer<C> {
    poller: ChainPoller<C>,
    pool: DetectorPool,
    cursor_store: Arc<dyn BlockCursorStore>,
    backoff: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<C: NodeClient + 'static> BlockConsumer<C> {
    pub fn new(
        poller: ChainPoller<C>,
        pool: DetectorPool,
        cursor_store: Arc<dyn BlockCursorStore>,
        block_backoff_seconds: u64,
    ) -> Self {
        Self {
            poller,
            pool,
            cursor_store,
            backoff: Duration::from_secs(block_backoff_seconds),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until shutdown. Resumes at the persisted cursor; the cursor block
    /// itself is redelivered once, which the operation store absorbs.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        let cursor = self.cursor_store.get_latest_block()?;
        if cursor > 0 {
            info!("Resuming from persisted block cursor {}", cursor);
        }

        let mut blocks = self.poller.start(cursor).await?;
        while let Some(block) = blocks.recv().await {
            self.consume(&block).await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        info!("Block consumer stopped");
        Ok(())
    }

    /// Stop after the block currently being processed completes or the next
    /// backoff expires.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.poller.shutdown();
    }

    /// Process one block to completion. Never gives up: any failure backs off
    /// and retries the whole block, so at-least-once delivery to the detectors
    /// holds across arbitrary transient faults.
    async fn consume(&self, block: &Block) {
        loop {
            match self.route_block(block).await {
                Ok(()) => match self.cursor_store.set_latest_block(block.number) {
                    Ok(()) => return,
                    // An unrecorded cursor would silently skip this block on
                    // restart; treat the write like any other block failure.
                    Err(e) => warn!("Failed to persist cursor for block {}: {}", block.number, e),
                },
                Err(e) => error!("Failed to process block {}: {}", block.number, e),
            }

            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            sleep(self.backoff).await;
        }
    }

    async fn route_block(&self, block: &Block) -> Result<(), crate::detector::pool::PoolError> {
        for tx in &block.transactions {
            self.pool.handle_transaction(block, tx).await?;
        }
        Ok(())
    }
}
