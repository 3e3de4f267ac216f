//! End-to-end pipeline tests against a scripted node: poller, consumer,
//! detector pool, store and notifier wired together the way the binary wires
//! them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use large_tx_watcher::blockchain::bloom::{decode_hex, keccak256, Bloom};
use large_tx_watcher::blockchain::rpc_client::{
    Block, Log, NodeClient, Receipt, RpcError, Transaction,
};
use large_tx_watcher::blockchain::{BlockConsumer, ChainPoller};
use large_tx_watcher::config::{DetectorConfig, PollerConfig};
use large_tx_watcher::detector::{
    Detector, DetectorError, DetectorPool, LargeTransferDetector, Operation,
};
use large_tx_watcher::notifier::{Notifier, NotifyError, TransferEvent};
use large_tx_watcher::store::{BlockCursorStore, OperationStore, SqliteStore};

const TOKEN: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

fn transfer_topic() -> [u8; 32] {
    keccak256(b"Transfer(address,address,uint256)")
}

fn topic_hex(bytes: &[u8]) -> String {
    let mut hex = String::from("0x");
    for byte in bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn poller_config() -> PollerConfig {
    PollerConfig {
        confirmation_depth: 2,
        poll_interval_seconds: 1,
        not_found_delay_seconds: 1,
        error_delay_seconds: 1,
        request_delay_ms: 10,
        tip_refresh_interval_seconds: 1,
    }
}

fn detector_config() -> DetectorConfig {
    DetectorConfig {
        id: "large-usdt".to_string(),
        token_address: TOKEN.to_string(),
        token_symbol: "USDT".to_string(),
        token_decimals: 6,
        threshold: 1_000_000,
    }
}

/// Serves blocks 1..=tip. Only `interesting_block` carries a bloom that
/// matches the watched token, and only its transaction has a Transfer
/// receipt.
struct ScriptedNode {
    tip: u64,
    interesting_block: u64,
}

impl ScriptedNode {
    fn tx_hash(block: u64) -> String {
        format!("0xt{:x}", block)
    }

    fn block_bloom(&self, number: u64) -> Bloom {
        let mut bloom = Bloom::empty();
        if number == self.interesting_block {
            bloom.insert(&decode_hex(TOKEN).unwrap());
            bloom.insert(&transfer_topic());
        }
        bloom
    }
}

#[async_trait]
impl NodeClient for ScriptedNode {
    async fn get_latest_block_number(&self) -> Result<u64, RpcError> {
        Ok(self.tip)
    }

    async fn get_block(&self, number: u64) -> Result<Option<Block>, RpcError> {
        Ok(Some(Block {
            number,
            hash: format!("0xb{:x}", number),
            timestamp: 1_700_000_000 + number,
            logs_bloom: self.block_bloom(number).to_hex(),
            transactions: vec![Transaction {
                hash: Self::tx_hash(number),
                from: "0xf00".to_string(),
                to: Some(TOKEN.to_string()),
                value: "0x0".to_string(),
            }],
        }))
    }

    async fn batch_get_transaction_receipts(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Receipt>, RpcError> {
        let interesting_tx = Self::tx_hash(self.interesting_block);
        Ok(tx_hashes
            .iter()
            .map(|hash| Receipt {
                transaction_hash: hash.clone(),
                logs: if *hash == interesting_tx {
                    // 5,000,000 USDT in base units.
                    vec![Log {
                        address: TOKEN.to_string(),
                        topics: vec![
                            topic_hex(&transfer_topic()),
                            format!("0x{:0>64}", "1111111111111111111111111111111111111111"),
                            format!("0x{:0>64}", "2222222222222222222222222222222222222222"),
                        ],
                        data: format!("0x{:0>64x}", 5_000_000_000_000u128),
                    }]
                } else {
                    vec![]
                },
            })
            .collect())
    }
}

struct RecordingNotifier {
    events: Mutex<Vec<TransferEvent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &TransferEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

async fn wait_for_cursor(store: &SqliteStore, target: u64) {
    timeout(Duration::from_secs(600), async {
        loop {
            if store.get_latest_block().unwrap() >= target {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("cursor never reached the target");
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_detects_one_large_transfer() {
    let store = Arc::new(SqliteStore::new_in_memory(3600).unwrap());
    store.set_latest_block(8).unwrap();

    let node = Arc::new(ScriptedNode {
        tip: 12,
        interesting_block: 9,
    });
    let notifier = Arc::new(RecordingNotifier {
        events: Mutex::new(Vec::new()),
    });

    let detector = LargeTransferDetector::new(
        detector_config(),
        Arc::clone(&node),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    )
    .unwrap();

    let mut pool = DetectorPool::new(Arc::clone(&store) as Arc<dyn OperationStore>);
    pool.register(Box::new(detector));

    let poller = ChainPoller::new(node, poller_config());
    let consumer = Arc::new(BlockConsumer::new(
        poller,
        pool,
        Arc::clone(&store) as Arc<dyn BlockCursorStore>,
        1,
    ));

    let handle = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.start().await }
    });

    // Tip 12 at depth 2 admits blocks 8, 9 and 10.
    wait_for_cursor(&store, 10).await;
    consumer.shutdown();
    handle.await.unwrap().unwrap();

    let events = notifier.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tx_hash, "0xt9");
    assert_eq!(events[0].amount, 5_000_000.0);
    assert_eq!(events[0].symbol, "USDT");

    // The interesting transaction completed its operation; the bloom filter
    // kept the uninteresting blocks from ever creating one.
    let op = store.get_operation("large-usdt", "0xt9").unwrap().unwrap();
    assert!(op.done);
    assert_eq!(op.block_number, 9);
    assert!(store.get_operation("large-usdt", "0xt8").unwrap().is_none());
    assert!(store.get_operation("large-usdt", "0xta").unwrap().is_none());
}

/// Records every process call; optionally fails a fixed number of times
/// first.
struct CountingDetector {
    id: String,
    failures_remaining: AtomicU32,
    current_step: u32,
    calls: Arc<Mutex<Vec<String>>>,
}

impl CountingDetector {
    fn new(id: &str, failures: u32) -> (Self, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                id: id.to_string(),
                failures_remaining: AtomicU32::new(failures),
                current_step: 0,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Detector for CountingDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn should_skip(&self, _block: &Block, _tx: &Transaction) -> bool {
        false
    }

    fn begin(&mut self, op: &Operation, _tx: &Transaction) {
        self.current_step = op.state;
    }

    fn advance(&mut self) -> bool {
        self.current_step += 1;
        self.current_step < 2
    }

    async fn process(&mut self, _block: &Block, tx: &Transaction) -> Result<(), DetectorError> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DetectorError::Decode("transient".to_string()));
        }
        self.calls.lock().unwrap().push(tx.hash.clone());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_flaky_detector_retries_without_duplicating_work() {
    let store = Arc::new(SqliteStore::new_in_memory(3600).unwrap());
    store.set_latest_block(8).unwrap();

    let node = Arc::new(ScriptedNode {
        tip: 12,
        interesting_block: 0,
    });

    let (steady, steady_calls) = CountingDetector::new("det-steady", 0);
    let (flaky, flaky_calls) = CountingDetector::new("det-flaky", 2);

    let mut pool = DetectorPool::new(Arc::clone(&store) as Arc<dyn OperationStore>);
    pool.register(Box::new(steady));
    pool.register(Box::new(flaky));

    let poller = ChainPoller::new(node, poller_config());
    let consumer = Arc::new(BlockConsumer::new(
        poller,
        pool,
        Arc::clone(&store) as Arc<dyn BlockCursorStore>,
        1,
    ));

    let handle = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.start().await }
    });

    wait_for_cursor(&store, 10).await;
    consumer.shutdown();
    handle.await.unwrap().unwrap();

    // Block 8 was retried until the flaky detector recovered, yet the steady
    // detector's done operation kept it from running twice on any transaction.
    let expected = vec!["0xt8".to_string(), "0xt9".to_string(), "0xta".to_string()];
    assert_eq!(*steady_calls.lock().unwrap(), expected);
    assert_eq!(*flaky_calls.lock().unwrap(), expected);
}
