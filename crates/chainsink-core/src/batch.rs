//! Batching and flush engine shared by the network-backed sinks.
//!
//! # State machine
//!
//! ```text
//! Idle ──write──▶ Accumulating ──trigger──▶ FlushPending ──▶ Flushing
//!  ▲                   ▲                                        │
//!  └────── ok ─────────┴──────── failed: snapshot re-queued ────┘
//! ```
//!
//! Triggers are evaluated on every write and on a periodic timer:
//! - size: `pending >= batch_size`
//! - time: `now - last_flush >= flush_interval` and `pending > 0`
//!
//! The buffer lock is held only to enqueue and to snapshot-and-clear; the
//! backend write runs outside it so producers never wait on slow I/O. Flushes
//! themselves are serialized by a separate gate, which keeps delivery FIFO
//! even when a failed snapshot is re-queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::error::SinkError;
use crate::sink::{Sink, SinkCounters, SinkStatistics};
use crate::types::Event;

// ─── FlushPolicy ──────────────────────────────────────────────────────────────

/// Batching parameters for one sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushPolicy {
    /// Flush as soon as this many records are pending.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush pending records at least this often.
    #[serde(default = "default_flush_interval", with = "duration_ms")]
    pub flush_interval: Duration,
    /// Deadline for a single backend write.
    #[serde(default = "default_flush_timeout", with = "duration_ms")]
    pub flush_timeout: Duration,
    /// Upper bound on buffered records; the oldest are dropped beyond it.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_batch_size() -> usize { 100 }
fn default_flush_interval() -> Duration { Duration::from_secs(5) }
fn default_flush_timeout() -> Duration { Duration::from_secs(30) }
fn default_max_pending() -> usize { default_batch_size() * 100 }

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            flush_timeout: default_flush_timeout(),
            max_pending: default_max_pending(),
        }
    }
}

impl FlushPolicy {
    /// Set the batch size; `max_pending` follows at 100 batches.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.max_pending = batch_size.saturating_mul(100);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Reject zero sizes and durations.
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.batch_size == 0 {
            return Err(SinkError::config("batch_size must be positive"));
        }
        if self.flush_interval.is_zero() {
            return Err(SinkError::config("flush_interval must be positive"));
        }
        if self.flush_timeout.is_zero() {
            return Err(SinkError::config("flush_timeout must be positive"));
        }
        if self.max_pending < self.batch_size {
            return Err(SinkError::config("max_pending must be at least batch_size"));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ─── BatchBuffer ──────────────────────────────────────────────────────────────

/// Why a flush was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Time,
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Time => write!(f, "time"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Pending records plus the time of the last successful flush.
#[derive(Debug)]
pub struct BatchBuffer<R> {
    pending: Vec<R>,
    last_flush: Instant,
}

impl<R> BatchBuffer<R> {
    pub fn new(now: Instant) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: now,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// Append records at the tail.
    pub fn push(&mut self, records: impl IntoIterator<Item = R>) {
        self.pending.extend(records);
    }

    /// Snapshot and clear.
    pub fn take(&mut self) -> Vec<R> {
        std::mem::take(&mut self.pending)
    }

    /// Put a failed snapshot back at the head, ahead of anything appended
    /// while it was in flight.
    pub fn requeue(&mut self, mut snapshot: Vec<R>) {
        snapshot.append(&mut self.pending);
        self.pending = snapshot;
    }

    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }

    /// Drop the oldest records beyond `max`; returns how many were dropped.
    pub fn enforce_bound(&mut self, max: usize) -> usize {
        let excess = self.pending.len().saturating_sub(max);
        if excess > 0 {
            self.pending.drain(..excess);
        }
        excess
    }

    /// Evaluate the size and time triggers.
    pub fn trigger(&self, policy: &FlushPolicy, now: Instant) -> Option<FlushReason> {
        if self.pending.is_empty() {
            return None;
        }
        if self.pending.len() >= policy.batch_size {
            return Some(FlushReason::Size);
        }
        if now.saturating_duration_since(self.last_flush) >= policy.flush_interval {
            return Some(FlushReason::Time);
        }
        None
    }
}

// ─── BatchWriter ──────────────────────────────────────────────────────────────

/// Backend half of a batched sink: encodes events and commits batches.
///
/// `write_batch` must be all-or-nothing from the caller's point of view
/// (a transaction, a bulk request, a batched publish). If the future is
/// dropped on timeout or cancellation the batch counts as failed.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    /// Sink-native record built from one event.
    type Record: Send + Sync + 'static;

    /// Open connections and create schemas/indexes/templates.
    async fn connect(&mut self) -> Result<(), SinkError>;

    /// Convert one event into a record.
    fn encode(&self, event: &Event) -> Result<Self::Record, SinkError>;

    /// Commit one batch atomically.
    async fn write_batch(&self, records: &[Self::Record]) -> Result<(), SinkError>;

    /// Release the backend. Called once, after the final flush.
    async fn disconnect(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

// ─── FlushEngine ──────────────────────────────────────────────────────────────

struct FlushEngine<W: BatchWriter> {
    name: String,
    writer: W,
    policy: FlushPolicy,
    buffer: Mutex<BatchBuffer<W::Record>>,
    flush_gate: Mutex<()>,
    counters: Arc<SinkCounters>,
}

impl<W: BatchWriter> FlushEngine<W> {
    /// Enqueue records and report whether a trigger fired.
    async fn enqueue(&self, records: Vec<W::Record>) -> Option<FlushReason> {
        let mut buffer = self.buffer.lock().await;
        buffer.push(records);
        let dropped = buffer.enforce_bound(self.policy.max_pending);
        self.counters.set_pending(buffer.len());
        if dropped > 0 {
            self.counters.record_dropped(dropped as u64);
            warn!(sink = %self.name, dropped, "batch buffer full, oldest records dropped");
        }
        buffer.trigger(&self.policy, Instant::now())
    }

    /// Flush pending records if `reason` still holds once the gate is taken.
    async fn flush(
        &self,
        reason: FlushReason,
        cancel: &CancellationToken,
    ) -> Result<usize, SinkError> {
        let _gate = self.flush_gate.lock().await;

        let snapshot = {
            let mut buffer = self.buffer.lock().await;
            let due = match reason {
                FlushReason::Shutdown => !buffer.is_empty(),
                _ => buffer.trigger(&self.policy, Instant::now()).is_some(),
            };
            if !due {
                return Ok(0);
            }
            let snapshot = buffer.take();
            self.counters.set_pending(0);
            snapshot
        };
        let records = snapshot.len();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SinkError::Cancelled { sink: self.name.clone() }),
            outcome = tokio::time::timeout(self.policy.flush_timeout, self.writer.write_batch(&snapshot)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(SinkError::Timeout {
                        sink: self.name.clone(),
                        ms: self.policy.flush_timeout.as_millis() as u64,
                    }),
                }
            }
        };

        let mut buffer = self.buffer.lock().await;
        match result {
            Ok(()) => {
                buffer.mark_flushed(Instant::now());
                self.counters.record_batch(records as u64);
                debug!(sink = %self.name, %reason, records, "batch flushed");
                Ok(records)
            }
            Err(e) => {
                self.counters.record_error();
                buffer.requeue(snapshot);
                let dropped = buffer.enforce_bound(self.policy.max_pending);
                if dropped > 0 {
                    self.counters.record_dropped(dropped as u64);
                }
                self.counters.set_pending(buffer.len());
                warn!(
                    sink = %self.name,
                    %reason,
                    records,
                    requeued = buffer.len(),
                    dropped,
                    error = %e,
                    "flush failed, batch re-queued"
                );
                Err(e)
            }
        }
    }
}

/// Timer-driven flush loop. Returns the outcome of the final flush.
async fn run_worker<W: BatchWriter>(
    engine: Arc<FlushEngine<W>>,
    shutdown: CancellationToken,
) -> Result<usize, SinkError> {
    let mut ticker = tokio::time::interval(engine.policy.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // Errors are already counted and logged by the engine.
                let _ = engine.flush(FlushReason::Time, &shutdown).await;
            }
        }
    }

    engine.flush(FlushReason::Shutdown, &CancellationToken::new()).await
}

// ─── BatchedSink ──────────────────────────────────────────────────────────────

/// A [`Sink`] that buffers records for a [`BatchWriter`] and flushes them on
/// size or time triggers, with one background worker for the time trigger.
pub struct BatchedSink<W: BatchWriter> {
    name: String,
    policy: FlushPolicy,
    writer: Option<W>,
    engine: Option<Arc<FlushEngine<W>>>,
    worker: Option<JoinHandle<Result<usize, SinkError>>>,
    shutdown: CancellationToken,
    counters: Arc<SinkCounters>,
    span: Span,
    closed: bool,
}

impl<W: BatchWriter> BatchedSink<W> {
    pub fn new(name: impl Into<String>, writer: W, policy: FlushPolicy) -> Self {
        let name = name.into();
        let span = tracing::info_span!("sink", sink = %name);
        Self {
            name,
            policy,
            writer: Some(writer),
            engine: None,
            worker: None,
            shutdown: CancellationToken::new(),
            counters: Arc::new(SinkCounters::new()),
            span,
            closed: false,
        }
    }

    /// Replace the logging span the background worker runs in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// The backend, once initialized.
    pub fn backend(&self) -> Option<&W> {
        self.engine.as_ref().map(|e| &e.writer)
    }

    /// Flush whatever is pending right now, regardless of triggers.
    pub async fn flush_now(&self, cancel: &CancellationToken) -> Result<usize, SinkError> {
        let engine = self.engine()?;
        engine.flush(FlushReason::Shutdown, cancel).await
    }

    fn engine(&self) -> Result<&Arc<FlushEngine<W>>, SinkError> {
        self.engine.as_ref().ok_or_else(|| SinkError::NotInitialized {
            sink: self.name.clone(),
        })
    }
}

#[async_trait]
impl<W: BatchWriter> Sink for BatchedSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<(), SinkError> {
        self.policy
            .validate()
            .map_err(|e| SinkError::init(&self.name, e))?;

        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| SinkError::init(&self.name, "already initialized"))?;

        writer.connect().await.map_err(|e| match e {
            SinkError::Init { .. } => e,
            other => SinkError::init(&self.name, other),
        })?;

        let engine = Arc::new(FlushEngine {
            name: self.name.clone(),
            writer,
            policy: self.policy.clone(),
            buffer: Mutex::new(BatchBuffer::new(Instant::now())),
            flush_gate: Mutex::new(()),
            counters: Arc::clone(&self.counters),
        });

        let worker = run_worker(Arc::clone(&engine), self.shutdown.clone());
        self.worker = Some(tokio::spawn(worker.instrument(self.span.clone())));
        self.engine = Some(engine);

        info!(
            sink = %self.name,
            batch_size = self.policy.batch_size,
            flush_interval_ms = self.policy.flush_interval.as_millis() as u64,
            "batched sink initialized"
        );
        Ok(())
    }

    async fn write(
        &mut self,
        events: &[Event],
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::write(&self.name, "sink is closed"));
        }
        let engine = Arc::clone(self.engine()?);
        if events.is_empty() {
            return Ok(());
        }

        let mut records = Vec::with_capacity(events.len());
        let mut rejected = 0usize;
        for event in events {
            match engine.writer.encode(event) {
                Ok(record) => records.push(record),
                Err(e) => {
                    rejected += 1;
                    warn!(
                        sink = %self.name,
                        block = event.block_number,
                        tx = %event.tx_hash_hex(),
                        error = %e,
                        "event could not be encoded"
                    );
                }
            }
        }

        if let Some(reason) = engine.enqueue(records).await {
            engine.flush(reason, cancel).await?;
        }

        if rejected > 0 {
            self.counters.record_error();
            return Err(SinkError::write(
                &self.name,
                format!("{rejected} of {} events could not be encoded", events.len()),
            ));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shutdown.cancel();

        let Some(engine) = self.engine.take() else {
            // Never initialized (or initialize failed): nothing to flush.
            return Ok(());
        };

        let final_flush = match self.worker.take() {
            Some(handle) => handle
                .await
                .map_err(|e| SinkError::close(&self.name, format!("flush worker panicked: {e}")))
                .and_then(|r| r),
            None => engine.flush(FlushReason::Shutdown, &CancellationToken::new()).await,
        };

        let disconnected = engine.writer.disconnect().await;
        let stats = self.counters.snapshot();
        info!(
            sink = %self.name,
            total_events = stats.total_events,
            total_batches = stats.total_batches,
            errors = stats.errors,
            "batched sink closed"
        );
        self.engine = Some(engine);

        match (final_flush, disconnected) {
            (Err(e), _) => {
                error!(sink = %self.name, lost = stats.pending, error = %e, "final flush failed");
                Err(SinkError::close(&self.name, e))
            }
            (Ok(_), Err(e)) => Err(SinkError::close(&self.name, e)),
            (Ok(_), Ok(())) => Ok(()),
        }
    }

    fn statistics(&self) -> SinkStatistics {
        self.counters.snapshot()
    }
}
