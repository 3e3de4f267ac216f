use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;

use crate::blockchain::bloom::{decode_hex, keccak256, Bloom};
use crate::blockchain::rpc_client::{Block, Log, NodeClient, Receipt, Transaction};
use crate::config::DetectorConfig;
use crate::detector::{Detector, DetectorError, Operation};
use crate::notifier::{Notifier, TransferEvent};

/// keccak256("Transfer(address,address,uint256)")
static TRANSFER_TOPIC: Lazy<[u8; 32]> =
    Lazy::new(|| keccak256(b"Transfer(address,address,uint256)"));

static TRANSFER_TOPIC_HEX: Lazy<String> = Lazy::new(|| {
    let mut hex = String::with_capacity(64);
    for byte in TRANSFER_TOPIC.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
});

/// Watches a single ERC-20 token for transfers at or above a configured
/// threshold and notifies on each hit.
///
/// Receipts are fetched once per block with the batched lookup and cached, so
/// a block with many transactions costs one round trip, not one per
/// transaction.
pub struct LargeTransferDetector<C> {
    config: DetectorConfig,
    token_address: String,
    token_address_bytes: Vec<u8>,
    threshold_base_units: u128,
    client: Arc<C>,
    notifier: Arc<dyn Notifier>,

    current_state: u32,
    cached_block: Option<u64>,
    cached_receipts: Vec<Receipt>,
}

impl<C: NodeClient> LargeTransferDetector<C> {
    pub fn new(
        config: DetectorConfig,
        client: Arc<C>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, DetectorError> {
        let token_address = normalize_hex(&config.token_address);
        let token_address_bytes = decode_hex(&token_address)
            .map_err(|e| DetectorError::Decode(format!("Invalid token address: {}", e)))?;
        let threshold_base_units = 10u128
            .checked_pow(config.token_decimals)
            .and_then(|scale| (config.threshold as u128).checked_mul(scale))
            .ok_or_else(|| {
                DetectorError::Decode(format!(
                    "Threshold {} with {} decimals overflows the amount range",
                    config.threshold, config.token_decimals
                ))
            })?;

        Ok(Self {
            config,
            token_address,
            token_address_bytes,
            threshold_base_units,
            client,
            notifier,
            current_state: 0,
            cached_block: None,
            cached_receipts: Vec::new(),
        })
    }

    /// Fetch (and cache) the receipts for every transaction in the block.
    async fn ensure_receipts(&mut self, block: &Block) -> Result<(), DetectorError> {
        if self.cached_block == Some(block.number) {
            return Ok(());
        }
        let tx_hashes: Vec<String> = block
            .transactions
            .iter()
            .map(|tx| tx.hash.clone())
            .collect();
        self.cached_receipts = self.client.batch_get_transaction_receipts(&tx_hashes).await?;
        self.cached_block = Some(block.number);
        Ok(())
    }

    /// Find this transaction's Transfer log emitted by the watched token.
    fn find_transfer_log(&self, tx: &Transaction) -> Option<&Log> {
        let tx_hash = normalize_hex(&tx.hash);
        self.cached_receipts
            .iter()
            .find(|receipt| normalize_hex(&receipt.transaction_hash) == tx_hash)
            .and_then(|receipt| {
                receipt.logs.iter().find(|log| {
                    normalize_hex(&log.address) == self.token_address
                        && log
                            .topics
                            .first()
                            .map(|topic| normalize_hex(topic) == *TRANSFER_TOPIC_HEX)
                            .unwrap_or(false)
                })
            })
    }

    fn readable_amount(&self, base_units: u128) -> f64 {
        (base_units / 10u128.pow(self.config.token_decimals)) as f64
    }
}

#[async_trait]
impl<C: NodeClient> Detector for LargeTransferDetector<C> {
    fn id(&self) -> &str {
        &self.config.id
    }

    /// Tests the block's logs bloom for both the token address and the
    /// Transfer topic. Either miss means no matching log can exist in the
    /// block. An unparsable bloom is treated as a potential match; skipping
    /// must never produce a false negative.
    fn should_skip(&self, block: &Block, _tx: &Transaction) -> bool {
        match Bloom::parse(&block.logs_bloom) {
            Ok(bloom) => {
                !(bloom.contains(&self.token_address_bytes)
                    && bloom.contains(&TRANSFER_TOPIC[..]))
            }
            Err(e) => {
                debug!("Unparsable logs bloom in block {}: {}", block.number, e);
                false
            }
        }
    }

    fn begin(&mut self, op: &Operation, _tx: &Transaction) {
        self.current_state = op.state;
    }

    /// A single check-and-report step: only the initial and the final state
    /// exist.
    fn advance(&mut self) -> bool {
        self.current_state += 1;
        self.current_state < 2
    }

    async fn process(&mut self, block: &Block, tx: &Transaction) -> Result<(), DetectorError> {
        self.ensure_receipts(block).await?;

        let transfer_log = match self.find_transfer_log(tx) {
            Some(log) => log,
            None => return Ok(()),
        };

        let (from, to, amount) = decode_transfer(transfer_log)?;
        if amount < self.threshold_base_units {
            return Ok(());
        }

        let event = TransferEvent {
            tx_hash: tx.hash.clone(),
            from: format!("0x{}", from),
            to: format!("0x{}", to),
            amount: self.readable_amount(amount),
            symbol: self.config.token_symbol.clone(),
        };
        self.notifier
            .notify(&event)
            .await
            .map_err(|e| DetectorError::Notify(e.to_string()))
    }
}

/// Decode an ERC-20 Transfer log into (from, to, amount in base units).
fn decode_transfer(log: &Log) -> Result<(String, String, u128), DetectorError> {
    if log.topics.len() != 3 {
        return Err(DetectorError::Decode(format!(
            "Expected 3 topics in a Transfer log, got {}",
            log.topics.len()
        )));
    }

    let from = extract_address_from_topic(&log.topics[1])?;
    let to = extract_address_from_topic(&log.topics[2])?;
    let amount = extract_amount_from_data(&log.data)?;

    Ok((from, to, amount))
}

/// Lowercase a hex string and strip any 0x prefix.
fn normalize_hex(value: &str) -> String {
    let trimmed = value.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

/// Extract the address from a 32-byte indexed topic (last 20 bytes).
fn extract_address_from_topic(topic: &str) -> Result<String, DetectorError> {
    let normalized = normalize_hex(topic);
    if normalized.len() != 64 {
        return Err(DetectorError::Decode(format!(
            "Topic should be 64 hex characters, got {}",
            normalized.len()
        )));
    }
    Ok(normalized[24..64].to_string())
}

/// Extract the amount from the 32-byte big-endian data field.
fn extract_amount_from_data(data: &str) -> Result<u128, DetectorError> {
    let normalized = normalize_hex(data);
    if normalized.len() != 64 {
        return Err(DetectorError::Decode(format!(
            "Data should be 64 hex characters, got {}",
            normalized.len()
        )));
    }
    u128::from_str_radix(&normalized, 16)
        .map_err(|e| DetectorError::Decode(format!("Failed to parse amount: {}", e)))
}
