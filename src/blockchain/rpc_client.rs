use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
    #[error("Got null receipt for tx {0}")]
    NullReceipt(String),
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<Value>,
    error: Option<JsonRpcError>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// A block as returned by `eth_getBlockByNumber` with full transaction objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(with = "hex_u64")]
    pub number: u64,
    pub hash: String,
    #[serde(with = "hex_u64")]
    pub timestamp: u64,
    #[serde(rename = "logsBloom")]
    pub logs_bloom: String,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

/// Node RPC boundary: block-number query, fetch-block-by-number and batched
/// receipt lookup. `ChainPoller` and the detectors are generic over this trait
/// so tests can drive them with a mock node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_latest_block_number(&self) -> Result<u64, RpcError>;

    /// Returns `Ok(None)` when the node reports the block as not yet available
    /// (propagation lag below the tip).
    async fn get_block(&self, number: u64) -> Result<Option<Block>, RpcError>;

    /// Fetches all receipts in a single batched round trip. All-or-nothing:
    /// any per-element error or null receipt fails the whole call. The returned
    /// receipts correspond positionally to the requested hashes.
    async fn batch_get_transaction_receipts(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Receipt>, RpcError>;
}

#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
}

impl RpcClient {
    pub fn new(endpoint: String, timeout_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_seconds))
                .build()
                .expect("Failed to create HTTP client"),
            endpoint,
        }
    }

    async fn make_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let rpc_response: JsonRpcResponse = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(RpcError::Rpc(format!(
                "Code: {}, Message: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| RpcError::InvalidResponse("No result in response".to_string()))
    }
}

#[async_trait]
impl NodeClient for RpcClient {
    async fn get_latest_block_number(&self) -> Result<u64, RpcError> {
        let result = self.make_request("eth_blockNumber", vec![]).await?;

        let hex_string = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("Block number is not a string".to_string()))?;

        parse_hex_to_u64(hex_string)
    }

    async fn get_block(&self, number: u64) -> Result<Option<Block>, RpcError> {
        let params = vec![
            Value::String(format!("0x{:x}", number)),
            Value::Bool(true), // Include full transaction objects
        ];

        let result = self.make_request("eth_getBlockByNumber", params).await?;

        if result.is_null() {
            return Ok(None);
        }

        let block: Block = serde_json::from_value(result)?;
        Ok(Some(block))
    }

    async fn batch_get_transaction_receipts(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Receipt>, RpcError> {
        if tx_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<JsonRpcRequest> = tx_hashes
            .iter()
            .enumerate()
            .map(|(i, tx_hash)| JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                method: "eth_getTransactionReceipt".to_string(),
                params: vec![Value::String(tx_hash.clone())],
                id: i as u64,
            })
            .collect();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&requests)
            .send()
            .await?;

        let responses: Vec<JsonRpcResponse> = response.json().await?;

        if responses.len() != tx_hashes.len() {
            return Err(RpcError::InvalidResponse(format!(
                "Expected {} batch responses, got {}",
                tx_hashes.len(),
                responses.len()
            )));
        }

        // Batch responses may arrive in any order; slot them back by request id
        // to preserve positional correspondence with the requested hashes.
        let mut receipts: Vec<Option<Receipt>> = vec![None; tx_hashes.len()];
        for rpc_response in responses {
            let index = rpc_response.id as usize;
            if index >= tx_hashes.len() {
                return Err(RpcError::InvalidResponse(format!(
                    "Unexpected batch response id {}",
                    rpc_response.id
                )));
            }

            if let Some(error) = rpc_response.error {
                return Err(RpcError::Rpc(format!(
                    "Code: {}, Message: {}",
                    error.code, error.message
                )));
            }

            match rpc_response.result {
                Some(value) if !value.is_null() => {
                    receipts[index] = Some(serde_json::from_value(value)?);
                }
                _ => return Err(RpcError::NullReceipt(tx_hashes[index].clone())),
            }
        }

        receipts
            .into_iter()
            .enumerate()
            .map(|(i, receipt)| {
                receipt.ok_or_else(|| {
                    RpcError::InvalidResponse(format!("Missing batch response for id {}", i))
                })
            })
            .collect()
    }
}

pub fn parse_hex_to_u64(hex_str: &str) -> Result<u64, RpcError> {
    let hex_without_prefix = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(hex_without_prefix, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to parse hex to u64: {}", e)))
}

mod hex_u64 {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        let without_prefix = s.strip_prefix("0x").unwrap_or(&s);
        u64::from_str_radix(without_prefix, 16).map_err(serde::de::Error::custom)
    }
}
