//! ERC20 `Transfer` / `Approval` log decoding shared by every sink.
//!
//! Decoding is total: a log that does not look like a known ERC20 event is
//! tagged [`EventKind::Unknown`] and keeps only its raw topics and data.

use alloy_primitives::{b256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::Log;

/// `keccak256("Transfer(address,address,uint256)")`
pub const TRANSFER_SIGNATURE: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// `keccak256("Approval(address,address,uint256)")`
pub const APPROVAL_SIGNATURE: B256 =
    b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");

/// Kind of ERC20 event carried by a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Transfer,
    Approval,
    Unknown,
}

impl EventKind {
    /// Look up the event kind for a signature hash (`topics[0]`).
    pub fn from_signature(signature: &B256) -> Self {
        if *signature == TRANSFER_SIGNATURE {
            Self::Transfer
        } else if *signature == APPROVAL_SIGNATURE {
            Self::Approval
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "Transfer",
            Self::Approval => "Approval",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded view of a single log.
///
/// For `Transfer`, `from`/`to` are sender and recipient; for `Approval` they
/// are owner and spender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub kind: EventKind,
    pub from: Option<Address>,
    pub to: Option<Address>,
    /// First 32-byte word of `data`, unscaled (no token decimals applied).
    pub value: Option<U256>,
}

impl DecodedLog {
    fn unknown() -> Self {
        Self {
            kind: EventKind::Unknown,
            from: None,
            to: None,
            value: None,
        }
    }

    /// Approval owner (same slot as `from`).
    pub fn owner(&self) -> Option<Address> {
        self.from
    }

    /// Approval spender (same slot as `to`).
    pub fn spender(&self) -> Option<Address> {
        self.to
    }

    /// The value as its full `0x`-prefixed 32-byte hex word.
    pub fn value_word(&self) -> Option<String> {
        self.value
            .map(|v| crate::types::hex_prefixed(v.to_be_bytes::<32>()))
    }
}

/// Decode a log into its ERC20 view. Never fails.
pub fn decode_log(log: &Log) -> DecodedLog {
    if log.topics.len() < 3 {
        return DecodedLog::unknown();
    }

    let kind = EventKind::from_signature(&log.topics[0]);
    if kind == EventKind::Unknown {
        return DecodedLog::unknown();
    }

    let value = (log.data.len() >= 32).then(|| U256::from_be_slice(&log.data[..32]));

    DecodedLog {
        kind,
        from: Some(word_to_address(&log.topics[1])),
        to: Some(word_to_address(&log.topics[2])),
        value,
    }
}

/// Low 20 bytes of a 32-byte topic word.
pub fn word_to_address(word: &B256) -> Address {
    Address::from_slice(&word[12..])
}
