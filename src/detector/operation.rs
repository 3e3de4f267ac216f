use serde::{Deserialize, Serialize};

/// Durable record of one detector's processing progress against one
/// transaction. Keyed by (detector_id, tx_hash).
///
/// `state` is monotonically non-decreasing while `done` is false; once `done`
/// the record is immutable and eligible for expiry after the store's
/// retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    #[serde(rename = "detectorId")]
    pub detector_id: String,
    pub state: u32,
    pub done: bool,
}

impl Operation {
    /// A fresh operation for the first encounter of a (detector, transaction)
    /// pair.
    pub fn new(detector_id: &str, tx_hash: &str, block_number: u64) -> Self {
        Self {
            tx_hash: tx_hash.to_string(),
            block_number,
            detector_id: detector_id.to_string(),
            state: 0,
            done: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_operation_starts_pristine() {
        let op = Operation::new("default-detector", "0xabc", 96);
        assert_eq!(op.state, 0);
        assert!(!op.done);
        assert_eq!(op.block_number, 96);
    }

    #[test]
    fn test_serde_field_names() {
        let op = Operation::new("default-detector", "0xabc", 96);
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"txHash\":\"0xabc\""));
        assert!(json.contains("\"blockNumber\":96"));
        assert!(json.contains("\"detectorId\":\"default-detector\""));
    }
}
