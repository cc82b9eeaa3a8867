//! Serializable record shapes shared by the file, document-store and topic
//! sinks. Built once from an [`Event`] through the shared decoder.

use serde::{Deserialize, Serialize};

use crate::decode::{decode_log, EventKind};
use crate::types::{address_hex, hex_prefixed, Event, Log};

/// Flattened, string-typed view of one log plus its decoded ERC20 fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub event_type: EventKind,
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub log_index: u64,
    pub tx_index: u64,
    /// Sender (Transfer) or owner (Approval); empty when not decodable.
    pub from: String,
    /// Recipient (Transfer) or spender (Approval); empty when not decodable.
    pub to: String,
    /// Full 32-byte value word; empty when not decodable.
    pub value: String,
}

impl LogRecord {
    pub fn from_log(log: &Log) -> Self {
        let decoded = decode_log(log);
        Self {
            event_type: decoded.kind,
            address: address_hex(&log.address),
            topics: log.topics_hex(),
            data: hex_prefixed(&log.data),
            log_index: log.log_index,
            tx_index: log.tx_index,
            from: decoded.from.as_ref().map(address_hex).unwrap_or_default(),
            to: decoded.to.as_ref().map(address_hex).unwrap_or_default(),
            value: decoded.value_word().unwrap_or_default(),
        }
    }
}

/// One transaction with its decoded logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_index: u64,
    pub status: String,
    pub status_code: u64,
    pub gas_used: u64,
    pub log_count: usize,
    pub logs: Vec<LogRecord>,
}

impl EventRecord {
    pub fn from_event(event: &Event) -> Self {
        Self {
            block_number: event.block_number,
            tx_hash: event.tx_hash_hex(),
            tx_index: event.tx_index,
            status: event.status.to_string(),
            status_code: event.status.code(),
            gas_used: event.gas_used,
            log_count: event.logs.len(),
            logs: event.logs.iter().map(LogRecord::from_log).collect(),
        }
    }
}
