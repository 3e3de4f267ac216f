use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::blockchain::rpc_client::{Block, Transaction};
use crate::detector::{Detector, DetectorError, Operation};
use crate::store::{OperationStore, StoreError};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Detector '{id}' failed: {source}")]
    Detector {
        id: String,
        #[source]
        source: DetectorError,
    },
    #[error("Failed to save the operation: {0}")]
    Store(#[from] StoreError),
}

/// Aggregates registered detectors and routes every transaction through each
/// of them, in registration order, with durable resumable per-(detector,
/// transaction) progress.
///
/// A transaction whose operation reached `done` is never handed to that
/// detector again, which is what makes redelivered blocks harmless.
pub struct DetectorPool {
    detectors: Mutex<Vec<Box<dyn Detector>>>,
    store: Arc<dyn OperationStore>,
}

impl DetectorPool {
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self {
            detectors: Mutex::new(Vec::new()),
            store,
        }
    }

    /// Register a detector. Registration order is processing order.
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.get_mut().push(detector);
    }

    /// Route one transaction through every registered detector. Fails fast:
    /// the first detector error stops the remaining detectors for this
    /// transaction and surfaces to the caller, which retries the whole block.
    pub async fn handle_transaction(&self, block: &Block, tx: &Transaction) -> Result<(), PoolError> {
        let mut detectors = self.detectors.lock().await;
        for detector in detectors.iter_mut() {
            self.handle_with_detector(detector.as_mut(), block, tx)
                .await?;
        }
        Ok(())
    }

    async fn handle_with_detector(
        &self,
        detector: &mut dyn Detector,
        block: &Block,
        tx: &Transaction,
    ) -> Result<(), PoolError> {
        if detector.should_skip(block, tx) {
            return Ok(());
        }

        let existing = self.store.get_operation(detector.id(), &tx.hash)?;
        if let Some(op) = &existing {
            // Idempotency guarantee: completed pairs are never reprocessed.
            if op.done {
                return Ok(());
            }
        }
        let mut op = existing
            .unwrap_or_else(|| Operation::new(detector.id(), &tx.hash, block.number));

        // Iterate the detector's steps until the sequence completes or a step
        // fails. A failing step does not commit its state increment, so a
        // whole-block retry re-runs exactly the failed step.
        detector.begin(&op, tx);
        let mut step_err: Option<DetectorError> = None;
        loop {
            if !detector.advance() {
                op.done = true;
                break;
            }
            match detector.process(block, tx).await {
                Ok(()) => op.state += 1,
                Err(e) => {
                    step_err = Some(e);
                    break;
                }
            }
        }

        // No record is kept for explicitly declined transactions.
        if matches!(step_err, Some(DetectorError::Ignore)) {
            return Ok(());
        }

        self.store.save_operation(&op)?;

        match step_err {
            Some(source) => Err(PoolError::Detector {
                id: detector.id().to_string(),
                source,
            }),
            None => Ok(()),
        }
    }
}
