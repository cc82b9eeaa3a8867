//! The sink capability contract and per-sink statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;
use crate::types::Event;

/// One delivery target for events.
///
/// Lifecycle: `initialize` once → `write` repeatedly → `close` once.
/// `close` must be safe to call even if `initialize` failed part-way.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable identifier (e.g. `"console"`, `"filesystem"`, `"sql"`).
    fn name(&self) -> &str;

    /// Connect, create schemas/directories, and start the background worker.
    async fn initialize(&mut self) -> Result<(), SinkError>;

    /// Append events; may flush synchronously if a trigger fires.
    ///
    /// `cancel` aborts an in-flight backend call on a best-effort basis.
    async fn write(&mut self, events: &[Event], cancel: &CancellationToken)
        -> Result<(), SinkError>;

    /// Stop the worker, flush everything pending exactly once, release the
    /// backend.
    async fn close(&mut self) -> Result<(), SinkError>;

    /// Read-only snapshot of this sink's counters.
    fn statistics(&self) -> SinkStatistics;
}

// ─── Statistics ───────────────────────────────────────────────────────────────

/// Point-in-time snapshot of a sink's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStatistics {
    /// Events committed to the backend.
    pub total_events: u64,
    /// Successful flushes (or writes, for unbatched sinks).
    pub total_batches: u64,
    /// Failed flushes / writes.
    pub errors: u64,
    /// Records waiting in the batch buffer.
    pub pending: u64,
    /// Records discarded because the buffer hit its bound.
    pub dropped: u64,
}

/// Monotonic counters backing [`SinkStatistics`].
///
/// Never reset during a sink's lifetime.
#[derive(Debug, Default)]
pub struct SinkCounters {
    total_events: AtomicU64,
    total_batches: AtomicU64,
    errors: AtomicU64,
    pending: AtomicU64,
    dropped: AtomicU64,
}

impl SinkCounters {
    pub const fn new() -> Self {
        Self {
            total_events: AtomicU64::new(0),
            total_batches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record a committed batch of `events` events.
    #[inline]
    pub fn record_batch(&self, events: u64) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_events.fetch_add(events, Ordering::Relaxed);
    }

    /// Count events committed by a write that then failed partway.
    #[inline]
    pub fn record_events(&self, events: u64) {
        self.total_events.fetch_add(events, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self, records: u64) {
        self.dropped.fetch_add(records, Ordering::Relaxed);
    }

    /// Update the pending gauge.
    #[inline]
    pub fn set_pending(&self, records: usize) {
        self.pending.store(records as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkStatistics {
        SinkStatistics {
            total_events: self.total_events.load(Ordering::Relaxed),
            total_batches: self.total_batches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = SinkCounters::new();
        counters.record_batch(10);
        counters.record_batch(5);
        counters.record_events(2);
        counters.record_error();
        counters.set_pending(3);

        let stats = counters.snapshot();
        assert_eq!(stats.total_events, 17);
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.dropped, 0);
    }
}
