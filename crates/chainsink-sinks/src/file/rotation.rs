//! File rotation strategies and the per-file rotation state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use chainsink_core::SinkError;

/// When the file sink closes the current file and starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// Current file reached `max_file_size` bytes (uncompressed).
    Size,
    /// Current file has been open for `rotation_interval`.
    Time,
    /// Current file holds `max_events` events.
    Events,
    /// First UTC midnight after the current file was opened.
    Daily,
}

impl RotationStrategy {
    /// Whether a background timer is needed to rotate idle files.
    pub fn is_time_driven(self) -> bool {
        matches!(self, Self::Time | Self::Daily)
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Size => "size",
            Self::Time => "time",
            Self::Events => "events",
            Self::Daily => "daily",
        })
    }
}

impl FromStr for RotationStrategy {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size" => Ok(Self::Size),
            "time" => Ok(Self::Time),
            "events" => Ok(Self::Events),
            "daily" => Ok(Self::Daily),
            other => Err(SinkError::config(format!("unknown rotation strategy '{other}'"))),
        }
    }
}

/// Thresholds for the configured strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub strategy: RotationStrategy,
    pub max_file_size: u64,
    pub max_events: u64,
    pub interval: Duration,
}

impl RotationPolicy {
    /// True when `state` must be rotated before anything else is written.
    ///
    /// A file that holds no events is never rotated.
    pub fn should_rotate(&self, state: &RotationState, now: DateTime<Utc>) -> bool {
        if state.events == 0 {
            return false;
        }
        match self.strategy {
            RotationStrategy::Size => state.size_bytes >= self.max_file_size,
            RotationStrategy::Events => state.events >= self.max_events,
            RotationStrategy::Time => {
                let open_for = now.signed_duration_since(state.started_at);
                open_for.to_std().map(|d| d >= self.interval).unwrap_or(false)
            }
            RotationStrategy::Daily => now >= next_utc_midnight(state.started_at),
        }
    }

    /// How often the background worker re-checks a time-driven strategy.
    pub fn check_period(&self) -> Duration {
        const MAX_CHECK: Duration = Duration::from_secs(60);
        match self.strategy {
            RotationStrategy::Time => self.interval.min(MAX_CHECK).max(Duration::from_millis(100)),
            _ => MAX_CHECK,
        }
    }
}

/// State of the file currently being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationState {
    pub file_name: String,
    pub path: PathBuf,
    /// Uncompressed bytes written, header included.
    pub size_bytes: u64,
    pub events: u64,
    pub started_at: DateTime<Utc>,
}

impl RotationState {
    pub fn new(file_name: String, path: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self {
            file_name,
            path,
            size_bytes: 0,
            events: 0,
            started_at,
        }
    }
}

/// The first UTC midnight strictly after `t`.
pub fn next_utc_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = t
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(t.date_naive());
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}
