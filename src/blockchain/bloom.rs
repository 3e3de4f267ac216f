use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// Size of an Ethereum logs bloom in bytes (2048 bits).
pub const BLOOM_BYTES: usize = 256;

#[derive(Error, Debug)]
pub enum BloomError {
    #[error("Bloom filter must be {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("Bloom filter contains non-hexadecimal characters")]
    InvalidHex,
}

/// The 2048-bit probabilistic membership filter attached to every block header,
/// covering the addresses and topics of the block's logs. Detectors test it to
/// reject irrelevant blocks without fetching receipts. False positives are
/// expected; false negatives cannot occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bloom {
    bits: [u8; BLOOM_BYTES],
}

impl Bloom {
    /// An empty filter containing nothing.
    pub fn empty() -> Self {
        Self {
            bits: [0u8; BLOOM_BYTES],
        }
    }

    /// Parse a bloom from the block header's `logsBloom` hex string.
    pub fn parse(hex: &str) -> Result<Self, BloomError> {
        let stripped = hex.strip_prefix("0x").unwrap_or(hex);
        if stripped.len() != BLOOM_BYTES * 2 {
            return Err(BloomError::InvalidLength {
                expected: BLOOM_BYTES * 2,
                got: stripped.len(),
            });
        }

        let mut bits = [0u8; BLOOM_BYTES];
        for (i, chunk) in stripped.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| BloomError::InvalidHex)?;
            bits[i] = u8::from_str_radix(pair, 16).map_err(|_| BloomError::InvalidHex)?;
        }

        Ok(Self { bits })
    }

    /// Test whether the filter may contain the given input (an address or a
    /// 32-byte topic).
    pub fn contains(&self, input: &[u8]) -> bool {
        for (byte_index, mask) in bloom_positions(input) {
            if self.bits[byte_index] & mask == 0 {
                return false;
            }
        }
        true
    }

    /// Add an input to the filter. Used when building fixtures; real blooms
    /// arrive pre-computed from the node.
    pub fn insert(&mut self, input: &[u8]) {
        for (byte_index, mask) in bloom_positions(input) {
            self.bits[byte_index] |= mask;
        }
    }

    /// Render as the 0x-prefixed hex string the node would produce.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(2 + BLOOM_BYTES * 2);
        out.push_str("0x");
        for byte in &self.bits {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

/// The three (byte, mask) positions an input maps to: the low 11 bits of each
/// of the first three 16-bit words of its keccak256 hash.
fn bloom_positions(input: &[u8]) -> [(usize, u8); 3] {
    let hash = keccak256(input);
    let mut positions = [(0usize, 0u8); 3];
    for i in 0..3 {
        let bit = (((hash[2 * i] as usize) << 8) | hash[2 * i + 1] as usize) & 0x7ff;
        positions[i] = (BLOOM_BYTES - 1 - bit / 8, 1 << (bit % 8));
    }
    positions
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Decode a 0x-prefixed hex string into raw bytes.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, BloomError> {
    let stripped = hex.strip_prefix("0x").unwrap_or(hex);
    if stripped.len() % 2 != 0 {
        return Err(BloomError::InvalidHex);
    }
    stripped
        .as_bytes()
        .chunks(2)
        .map(|chunk| {
            let pair = std::str::from_utf8(chunk).map_err(|_| BloomError::InvalidHex)?;
            u8::from_str_radix(pair, 16).map_err(|_| BloomError::InvalidHex)
        })
        .collect()
}
