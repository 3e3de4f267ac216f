use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::blockchain::rpc_client::{Block, NodeClient, RpcError};
use crate::config::PollerConfig;

#[derive(Error, Debug)]
pub enum PollerError {
    #[error("Only one listener can be started")]
    AlreadyStarted,
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

/// Produces a strictly ordered stream of finalized blocks, gated on a
/// confirmation depth against the periodically refreshed chain tip and
/// self-throttled against the node.
///
/// The output channel has capacity one and the fetch loop reserves the send
/// slot before fetching, so a slow consumer throttles the whole pipeline and
/// at most one fetched block is ever waiting for delivery.
pub struct ChainPoller<C> {
    client: Arc<C>,
    config: PollerConfig,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl<C: NodeClient + 'static> ChainPoller<C> {
    pub fn new(client: Arc<C>, config: PollerConfig) -> Self {
        Self {
            client,
            config,
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Begin block production starting at `resume_from`, or at
    /// `observed_tip - confirmation_depth` when `resume_from` is zero.
    ///
    /// The returned sequence is infinite and not restartable: a second call on
    /// the same instance fails with `PollerError::AlreadyStarted`.
    pub async fn start(&self, resume_from: u64) -> Result<mpsc::Receiver<Block>, PollerError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PollerError::AlreadyStarted);
        }

        let tip = self.client.get_latest_block_number().await?;
        let next_block = if resume_from == 0 {
            tip.saturating_sub(self.config.confirmation_depth)
        } else {
            resume_from
        };

        info!(
            "Starting chain poller at block {} (observed tip {})",
            next_block, tip
        );

        let observed_tip = Arc::new(AtomicU64::new(tip));
        let (block_tx, block_rx) = mpsc::channel(1);

        self.spawn_tip_refresh(Arc::clone(&observed_tip));
        self.spawn_fetch_loop(next_block, observed_tip, block_tx);

        Ok(block_rx)
    }

    /// Stop both background tasks. In-flight requests are abandoned and the
    /// output channel closes once the fetch loop observes the signal.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn spawn_tip_refresh(&self, observed_tip: Arc<AtomicU64>) {
        let client = Arc::clone(&self.client);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = Duration::from_secs(self.config.tip_refresh_interval_seconds);

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match client.get_latest_block_number().await {
                    Ok(tip) => {
                        observed_tip.store(tip, Ordering::SeqCst);
                        debug!("Observed chain tip {}", tip);
                    }
                    Err(e) => warn!("Failed to refresh the chain tip: {}", e),
                }
            }
        });
    }

    fn spawn_fetch_loop(
        &self,
        mut next_block: u64,
        observed_tip: Arc<AtomicU64>,
        block_tx: mpsc::Sender<Block>,
    ) {
        let client = Arc::clone(&self.client);
        let shutdown = Arc::clone(&self.shutdown);
        let confirmation_depth = self.config.confirmation_depth;
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);
        let not_found_delay = Duration::from_secs(self.config.not_found_delay_seconds);
        let error_delay = Duration::from_secs(self.config.error_delay_seconds);
        let request_delay = Duration::from_millis(self.config.request_delay_ms);

        tokio::spawn(async move {
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                // Reorg-safety gate: only fetch once the tip has moved far
                // enough past the candidate block.
                let tip = observed_tip.load(Ordering::SeqCst);
                if tip.saturating_sub(next_block) < confirmation_depth {
                    sleep(poll_interval).await;
                    continue;
                }

                // Blocking handoff: claim the consumer's slot before fetching,
                // so at most one fetched block is ever awaiting delivery.
                let permit = match block_tx.reserve().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                match client.get_block(next_block).await {
                    Ok(None) => {
                        // Below the tip but not yet propagated on this node.
                        debug!("Block {} not yet available", next_block);
                        sleep(not_found_delay).await;
                    }
                    Err(e) => {
                        warn!("Failed to get block {}: {}", next_block, e);
                        sleep(error_delay).await;
                    }
                    Ok(Some(block)) => {
                        info!("Got new block {}", block.number);
                        permit.send(block);
                        next_block += 1;
                        // Node rate limiting.
                        sleep(request_delay).await;
                    }
                }
            }
            shutdown.store(true, Ordering::SeqCst);
        });
    }
}
