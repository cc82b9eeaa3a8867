//! Error types for the tracker.

use thiserror::Error;

use chainsink_core::SinkError;

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(String),

    #[error("Unsupported network: {0}. Supported networks: {supported}", supported = crate::config::supported_networks().join(", "))]
    UnsupportedNetwork(String),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: &str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that can occur while tracking.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Other(String),
}

impl TrackerError {
    /// Returns `true` for node or transport failures worth retrying next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Decode(_))
    }
}
