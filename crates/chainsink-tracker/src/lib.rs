//! # chainsink-tracker
//!
//! Watches one ERC20 contract (USDC by default) and feeds its events to a
//! [`chainsink_core::SinkManager`].
//!
//! ```text
//! RpcEventSource ──▶ Tracker (poll every block_interval) ──▶ SinkManager
//!   eth_blockNumber        skip already processed blocks
//!   eth_getBlockReceipts   filter receipts by contract
//! ```
//!
//! Configuration comes from environment variables, see [`config`].

pub mod config;
pub mod error;
pub mod filter;
pub mod sinks;
pub mod source;
pub mod tracker;

pub use config::{supported_networks, usdc_address, TrackerConfig};
pub use error::{ConfigError, TrackerError};
pub use filter::events_for_contract;
pub use sinks::{build_manager, default_registry};
pub use source::{EventSource, Receipt, RpcEventSource};
pub use tracker::{PollOutcome, Tracker, TrackerStats};
