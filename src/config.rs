use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub poller: PollerConfig,
    pub consumer: ConsumerConfig,
    pub store: StoreConfig,
    pub detector: DetectorConfig,
    pub slack: SlackConfig,
    pub logging: LoggingConfig,
}

/// RPC client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Ethereum JSON-RPC endpoint URL
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// Chain poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Blocks the observed tip must exceed a candidate by before it is fetched
    pub confirmation_depth: u64,
    /// Sleep between confirmation-gate checks, in seconds
    pub poll_interval_seconds: u64,
    /// Sleep when the node has not yet propagated a block, in seconds
    pub not_found_delay_seconds: u64,
    /// Sleep after a transient fetch error, in seconds
    pub error_delay_seconds: u64,
    /// Sleep after each delivered block, in milliseconds (node rate limit)
    pub request_delay_ms: u64,
    /// How often the observed chain tip is refreshed, in seconds
    pub tip_refresh_interval_seconds: u64,
}

/// Block consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Backoff before retrying a failed block, in seconds
    pub block_backoff_seconds: u64,
}

/// Operation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file path; empty string selects an in-memory database
    pub path: String,
    /// How long completed operations are retained for deduplication, in seconds
    pub operation_retention_seconds: u64,
}

/// Large transfer detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Stable detector identity, used as the operation partition key
    pub id: String,
    /// Watched ERC-20 token contract address
    pub token_address: String,
    /// Token symbol used in notifications
    pub token_symbol: String,
    /// Token decimals, for converting the threshold to base units
    pub token_decimals: u32,
    /// Notification threshold in whole tokens
    pub threshold: u64,
}

/// Slack notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// OAuth token; empty disables Slack and falls back to the log notifier
    pub oauth_token: String,
    /// Channel to post notifications to
    pub channel_id: String,
    /// Buffered messages are flushed at this interval, in seconds
    pub notify_interval_seconds: u64,
    /// Slack API base URL
    pub api_base_url: String,
    /// Block explorer base URL used for transaction links
    pub explorer_base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            poller: PollerConfig::default(),
            consumer: ConsumerConfig::default(),
            store: StoreConfig::default(),
            detector: DetectorConfig::default(),
            slack: SlackConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://eth.llamarpc.com/".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 4,
            poll_interval_seconds: 15,
            not_found_delay_seconds: 15,
            error_delay_seconds: 5,
            request_delay_ms: 100,
            tip_refresh_interval_seconds: 15,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            block_backoff_seconds: 5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./watcher.db".to_string(),
            operation_retention_seconds: 3600,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            id: "default-detector".to_string(),
            // USDT on Ethereum mainnet
            token_address: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
            token_symbol: "USDT".to_string(),
            token_decimals: 6,
            threshold: 1_000_000,
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            oauth_token: String::new(),
            channel_id: String::new(),
            notify_interval_seconds: 15,
            api_base_url: "https://slack.com/api".to_string(),
            explorer_base_url: "https://etherscan.io".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables.
    /// Environment variables take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if !Path::new(&config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.clone()))?;
        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("RPC_ENDPOINT") {
            self.rpc.endpoint = endpoint;
        }
        if let Ok(timeout) = env::var("RPC_TIMEOUT_SECONDS") {
            self.rpc.timeout_seconds = parse_env("RPC_TIMEOUT_SECONDS", timeout)?;
        }

        if let Ok(depth) = env::var("CONFIRMATION_DEPTH") {
            self.poller.confirmation_depth = parse_env("CONFIRMATION_DEPTH", depth)?;
        }
        if let Ok(interval) = env::var("POLL_INTERVAL_SECONDS") {
            self.poller.poll_interval_seconds = parse_env("POLL_INTERVAL_SECONDS", interval)?;
        }
        if let Ok(delay) = env::var("REQUEST_DELAY_MS") {
            self.poller.request_delay_ms = parse_env("REQUEST_DELAY_MS", delay)?;
        }

        if let Ok(backoff) = env::var("BLOCK_BACKOFF_SECONDS") {
            self.consumer.block_backoff_seconds = parse_env("BLOCK_BACKOFF_SECONDS", backoff)?;
        }

        if let Ok(path) = env::var("DATABASE_PATH") {
            self.store.path = path;
        }
        if let Ok(retention) = env::var("OPERATION_RETENTION_SECONDS") {
            self.store.operation_retention_seconds =
                parse_env("OPERATION_RETENTION_SECONDS", retention)?;
        }

        if let Ok(address) = env::var("WATCHED_TOKEN_ADDRESS") {
            self.detector.token_address = address;
        }
        if let Ok(symbol) = env::var("WATCHED_TOKEN_SYMBOL") {
            self.detector.token_symbol = symbol;
        }
        if let Ok(decimals) = env::var("WATCHED_TOKEN_DECIMALS") {
            self.detector.token_decimals = parse_env("WATCHED_TOKEN_DECIMALS", decimals)?;
        }
        if let Ok(threshold) = env::var("WATCHED_TOKEN_THRESHOLD") {
            self.detector.threshold = parse_env("WATCHED_TOKEN_THRESHOLD", threshold)?;
        }

        if let Ok(token) = env::var("SLACK_OAUTH_TOKEN") {
            self.slack.oauth_token = token;
        }
        if let Ok(channel) = env::var("SLACK_CHANNEL_ID") {
            self.slack.channel_id = channel;
        }
        if let Ok(interval) = env::var("SLACK_NOTIFY_INTERVAL_SECONDS") {
            self.slack.notify_interval_seconds =
                parse_env("SLACK_NOTIFY_INTERVAL_SECONDS", interval)?;
        }
        if let Ok(base) = env::var("EXPLORER_BASE_URL") {
            self.slack.explorer_base_url = base;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rpc.endpoint.starts_with("http://") && !self.rpc.endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.rpc.endpoint.clone()));
        }

        if self.rpc.timeout_seconds == 0 || self.rpc.timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "rpc.timeout_seconds".to_string(),
                value: self.rpc.timeout_seconds.to_string(),
            });
        }

        if self.poller.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poller.poll_interval_seconds".to_string(),
                value: self.poller.poll_interval_seconds.to_string(),
            });
        }

        if self.consumer.block_backoff_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "consumer.block_backoff_seconds".to_string(),
                value: self.consumer.block_backoff_seconds.to_string(),
            });
        }

        // Token address: 0x-prefixed 20-byte hex
        let address = &self.detector.token_address;
        if !address.starts_with("0x")
            || address.len() != 42
            || !address[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ConfigError::InvalidValue {
                key: "detector.token_address".to_string(),
                value: address.clone(),
            });
        }

        // 10^decimals must fit in u128 for base-unit conversion
        if self.detector.token_decimals > 38 {
            return Err(ConfigError::InvalidValue {
                key: "detector.token_decimals".to_string(),
                value: self.detector.token_decimals.to_string(),
            });
        }

        if self.detector.id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "detector.id".to_string(),
                value: self.detector.id.clone(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.rpc.timeout_seconds, 30);
        assert_eq!(config.poller.confirmation_depth, 4);
        assert_eq!(config.poller.request_delay_ms, 100);
        assert_eq!(config.consumer.block_backoff_seconds, 5);
        assert_eq!(config.store.operation_retention_seconds, 3600);
        assert_eq!(config.detector.id, "default-detector");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.rpc.endpoint = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.poller.poll_interval_seconds = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.detector.token_address = "0x1234".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.detector.token_decimals = 39;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.detector.id = "  ".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("RPC_ENDPOINT", "https://test-rpc.example/");
        env::set_var("CONFIRMATION_DEPTH", "12");
        env::set_var("DATABASE_PATH", "/tmp/test-watcher.db");
        env::set_var("WATCHED_TOKEN_THRESHOLD", "50000");
        env::set_var("LOG_LEVEL", "debug");

        let mut config = AppConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.rpc.endpoint, "https://test-rpc.example/");
        assert_eq!(config.poller.confirmation_depth, 12);
        assert_eq!(config.store.path, "/tmp/test-watcher.db");
        assert_eq!(config.detector.threshold, 50000);
        assert_eq!(config.logging.level, "debug");

        env::remove_var("RPC_ENDPOINT");
        env::remove_var("CONFIRMATION_DEPTH");
        env::remove_var("DATABASE_PATH");
        env::remove_var("WATCHED_TOKEN_THRESHOLD");
        env::remove_var("LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_invalid_env_values() {
        env::set_var("CONFIRMATION_DEPTH", "not-a-number");

        let mut config = AppConfig::default();
        let result = config.apply_env_overrides();

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::remove_var("CONFIRMATION_DEPTH");
    }

    #[test]
    #[serial]
    fn test_config_file_loading() {
        let config_content = r#"
[rpc]
endpoint = "https://custom-rpc.example/"
timeout_seconds = 45

[poller]
confirmation_depth = 6
poll_interval_seconds = 10
not_found_delay_seconds = 10
error_delay_seconds = 3
request_delay_ms = 200
tip_refresh_interval_seconds = 10

[consumer]
block_backoff_seconds = 2

[store]
path = "/tmp/custom.db"
operation_retention_seconds = 600

[detector]
id = "usdc-large"
token_address = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
token_symbol = "USDC"
token_decimals = 6
threshold = 250000

[slack]
oauth_token = ""
channel_id = ""
notify_interval_seconds = 30
api_base_url = "https://slack.com/api"
explorer_base_url = "https://etherscan.io"

[logging]
level = "warn"
"#;

        let mut temp_file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut temp_file, config_content.as_bytes()).unwrap();

        env::set_var("CONFIG_FILE", temp_file.path().to_str().unwrap());

        let config = AppConfig::load_from_file().unwrap();

        assert_eq!(config.rpc.endpoint, "https://custom-rpc.example/");
        assert_eq!(config.poller.confirmation_depth, 6);
        assert_eq!(config.consumer.block_backoff_seconds, 2);
        assert_eq!(config.store.operation_retention_seconds, 600);
        assert_eq!(config.detector.id, "usdc-large");
        assert_eq!(config.detector.threshold, 250000);
        assert_eq!(config.slack.notify_interval_seconds, 30);
        assert_eq!(config.logging.level, "warn");

        env::remove_var("CONFIG_FILE");
    }

    #[test]
    fn test_config_roundtrip() {
        let original = AppConfig::default();
        let toml_string = toml::to_string_pretty(&original).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_string).unwrap();

        assert_eq!(original.rpc.endpoint, parsed.rpc.endpoint);
        assert_eq!(original.poller.confirmation_depth, parsed.poller.confirmation_depth);
        assert_eq!(original.detector.token_address, parsed.detector.token_address);
    }
}
