pub mod blockchain;
pub mod config;
pub mod detector;
pub mod error;
pub mod notifier;
pub mod store;

pub use blockchain::{BlockConsumer, ChainPoller, NodeClient, RpcClient};
pub use config::AppConfig;
pub use detector::{Detector, DetectorPool, Operation};
pub use error::{Result, WatcherError};
pub use notifier::{Notifier, TransferEvent};
pub use store::{BlockCursorStore, OperationStore, SqliteStore};
