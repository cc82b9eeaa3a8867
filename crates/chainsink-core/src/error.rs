//! Error types for the sink subsystem.

use thiserror::Error;

/// Errors raised by a sink or by the batching engine behind it.
///
/// Only [`SinkError::Init`] is ever escalated by the manager; every other
/// variant stays isolated to the sink that produced it.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Initialization of '{sink}' failed: {reason}")]
    Init { sink: String, reason: String },

    #[error("Write to '{sink}' failed: {reason}")]
    Write { sink: String, reason: String },

    #[error("Flush of {records} records to '{sink}' failed: {reason}")]
    Flush {
        sink: String,
        records: usize,
        reason: String,
    },

    #[error("Flush of '{sink}' exceeded {ms}ms deadline")]
    Timeout { sink: String, ms: u64 },

    #[error("Operation on '{sink}' cancelled")]
    Cancelled { sink: String },

    #[error("Close of '{sink}' failed: {reason}")]
    Close { sink: String, reason: String },

    #[error("Sink '{sink}' is not initialized")]
    NotInitialized { sink: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SinkError {
    /// Create an initialization error for `sink`.
    pub fn init(sink: impl Into<String>, reason: impl ToString) -> Self {
        Self::Init {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a write error for `sink`.
    pub fn write(sink: impl Into<String>, reason: impl ToString) -> Self {
        Self::Write {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a close error for `sink`.
    pub fn close(sink: impl Into<String>, reason: impl ToString) -> Self {
        Self::Close {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Returns `true` if this error must abort startup.
    pub fn is_init(&self) -> bool {
        matches!(self, Self::Init { .. } | Self::Config(_))
    }

    /// Returns `true` if the failed batch can be retried on the next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Flush { .. } | Self::Timeout { .. } | Self::Cancelled { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_errors_are_fatal() {
        assert!(SinkError::init("sql", "connection refused").is_init());
        assert!(SinkError::config("batch_size must be positive").is_init());
        assert!(!SinkError::write("sql", "rejected").is_init());
    }

    #[test]
    fn display_includes_sink_name() {
        let err = SinkError::Timeout {
            sink: "kafka".into(),
            ms: 30_000,
        };
        assert_eq!(err.to_string(), "Flush of 'kafka' exceeded 30000ms deadline");
        assert!(err.is_retryable());
    }
}
