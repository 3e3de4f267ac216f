pub mod slack;

pub use slack::SlackNotifier;

use async_trait::async_trait;
use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to deliver the notification: {0}")]
    Delivery(String),
}

/// A detected transfer at or above the configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    /// Amount in whole tokens, already adjusted for decimals.
    pub amount: f64,
    pub symbol: String,
}

/// Delivery channel for transfer events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &TransferEvent) -> Result<(), NotifyError>;
}

/// Fallback notifier used when Slack is not configured. Writes each event to
/// the application log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TransferEvent) -> Result<(), NotifyError> {
        info!(
            "Large transfer: {} {} from {} to {} (tx {})",
            event.amount, event.symbol, event.from, event.to, event.tx_hash
        );
        Ok(())
    }
}
