use thiserror::Error;

/// Top-level error type for the large transfer watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("RPC error: {0}")]
    Rpc(#[from] crate::blockchain::rpc_client::RpcError),

    #[error("Poller error: {0}")]
    Poller(#[from] crate::blockchain::poller::PollerError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] crate::blockchain::consumer::ConsumerError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Detector pool error: {0}")]
    Pool(#[from] crate::detector::pool::PoolError),

    #[error("Detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors. These are fatal: the process reports them and exits.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, WatcherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "poller.confirmation_depth".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Invalid configuration value for poller.confirmation_depth: abc"
        );

        let err = ConfigError::InvalidUrl("not-a-url".to_string());
        assert_eq!(format!("{}", err), "Invalid URL format: not-a-url");
    }
}
