//! chainsink-sinks: concrete sink backends for ChainSink.
//!
//! Backends:
//! - [`console`]: human-readable stdout printout
//! - [`file`]: rotating files (json / jsonl / csv / text, optional gzip)
//! - `sql`: PostgreSQL via `sqlx` (feature `postgres`)
//! - `elasticsearch`: bulk API over HTTP (feature `elasticsearch`)
//! - `kafka`: one message per event via `rdkafka` (feature `kafka`)
//!
//! The network-backed sinks are [`chainsink_core::BatchWriter`]s wrapped in a
//! [`chainsink_core::BatchedSink`]; console and file write through directly.

pub mod console;
pub mod file;

#[cfg(feature = "postgres")]
pub mod sql;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use console::ConsoleSink;
pub use file::{FileFormat, FileSink, FileSinkConfig, RotationStrategy};

#[cfg(feature = "postgres")]
pub use sql::{SqlConfig, SqlSink, SqlWriter};

#[cfg(feature = "elasticsearch")]
pub use elasticsearch::{ElasticsearchConfig, ElasticsearchSink, ElasticsearchWriter};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaSink, KafkaWriter};
