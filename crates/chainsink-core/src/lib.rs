//! # chainsink-core
//!
//! Core of the ChainSink event fan-out subsystem.
//!
//! An upstream poll loop produces one `Vec<Event>` per cycle (a transaction
//! receipt plus its logs from the watched contract) and hands it to a
//! [`SinkManager`], which fans the batch out to every registered [`Sink`].
//!
//! ## Architecture
//!
//! ```text
//! Event[] ─▶ SinkManager ─┬─▶ console
//!                         ├─▶ filesystem (formats + rotation)
//!                         ├─▶ BatchedSink<SqlWriter>
//!                         ├─▶ BatchedSink<ElasticsearchWriter>
//!                         └─▶ BatchedSink<KafkaWriter>
//! ```
//!
//! Network-backed sinks share the [`batch`] engine: per-sink buffer, size and
//! time triggers, one background flush worker, and a final flush on close.
//! Every sink decodes logs through the shared [`decode`] module.

pub mod batch;
pub mod decode;
pub mod error;
pub mod logging;
pub mod manager;
pub mod record;
pub mod registry;
pub mod sink;
pub mod types;

pub use batch::{BatchBuffer, BatchWriter, BatchedSink, FlushPolicy, FlushReason};
pub use decode::{decode_log, DecodedLog, EventKind, APPROVAL_SIGNATURE, TRANSFER_SIGNATURE};
pub use error::SinkError;
pub use manager::SinkManager;
pub use record::{EventRecord, LogRecord};
pub use registry::{Resolved, SinkConstructor, SinkRegistry};
pub use sink::{Sink, SinkCounters, SinkStatistics};
pub use types::{Event, Log, TxStatus};

// Re-exported so downstream crates can share one version.
pub use alloy_primitives;
pub use tokio_util::sync::CancellationToken;
