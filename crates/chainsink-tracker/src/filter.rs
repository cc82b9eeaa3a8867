//! Receipt → [`Event`] conversion for one watched contract.

use alloy_primitives::Address;

use chainsink_core::types::{Event, Log};

use crate::source::Receipt;

/// Keep receipts with at least one log from `contract`, and within each of
/// them only the logs from `contract`. Receipt order is preserved.
///
/// Addresses are compared as parsed bytes, so checksum and lowercase spellings
/// match.
pub fn events_for_contract(block_number: u64, receipts: Vec<Receipt>, contract: Address) -> Vec<Event> {
    receipts
        .into_iter()
        .filter_map(|receipt| {
            let logs: Vec<Log> = receipt
                .logs
                .into_iter()
                .filter(|log| log.address == contract)
                .collect();
            if logs.is_empty() {
                return None;
            }
            Some(Event {
                block_number,
                tx_hash: receipt.tx_hash,
                tx_index: receipt.tx_index,
                status: receipt.status,
                gas_used: receipt.gas_used,
                logs,
            })
        })
        .collect()
}
