//! Event and log value types flowing from the tracker into the sinks.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

// ─── TxStatus ─────────────────────────────────────────────────────────────────

/// Outcome of the transaction as reported by its receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failed,
}

impl TxStatus {
    /// Map the receipt status code (`1` = success) to a status.
    pub fn from_code(code: u64) -> Self {
        if code == 1 {
            Self::Success
        } else {
            Self::Failed
        }
    }

    /// The receipt status code.
    pub fn code(self) -> u64 {
        match self {
            Self::Success => 1,
            Self::Failed => 0,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// One EVM log emitted by the watched contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash when present.
    pub topics: Vec<B256>,
    /// Non-indexed ABI-encoded payload.
    pub data: Bytes,
    /// Position of the log within the block.
    pub log_index: u64,
    /// Position of the emitting transaction within the block.
    pub tx_index: u64,
}

impl Log {
    /// Topics rendered as `0x…` strings.
    pub fn topics_hex(&self) -> Vec<String> {
        self.topics.iter().map(hex_prefixed).collect()
    }
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// One transaction receipt plus the subset of its logs matching the watched
/// contract address.
///
/// Events are immutable once built; sinks only ever see `&[Event]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub block_number: u64,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub status: TxStatus,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

impl Event {
    /// Transaction hash as a `0x…` string.
    pub fn tx_hash_hex(&self) -> String {
        hex_prefixed(self.tx_hash)
    }
}

// ─── Hex helpers ──────────────────────────────────────────────────────────────

/// Lowercase hex with a `0x` prefix.
pub fn hex_prefixed(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// EIP-55 checksummed address string.
pub fn address_hex(address: &Address) -> String {
    address.to_checksum(None)
}
