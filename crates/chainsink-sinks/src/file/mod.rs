//! Filesystem sink: formatted, rotating, optionally compressed event files.
//!
//! Every event is appended to the file in `current/`. Before each event the
//! rotation policy is checked; when it fires the current file is finished
//! (JSON footer, gzip trailer) and moved to `archive/<YYYY>/<MM>/`, and a new
//! file is opened. Time-driven strategies (`time`, `daily`) are also checked
//! by one background worker so idle files still rotate. Both paths share the
//! sink state through a single mutex.

pub mod format;
pub mod index;
pub mod layout;
pub mod output;
pub mod rotation;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use chainsink_core::types::Event;
use chainsink_core::{Sink, SinkCounters, SinkError, SinkStatistics};

pub use format::FileFormat;
pub use index::{IndexEntry, IndexWriter};
pub use layout::{file_name, Layout};
pub use rotation::{RotationPolicy, RotationState, RotationStrategy};

use output::Output;

const SINK_NAME: &str = "filesystem";

// ─── Configuration ────────────────────────────────────────────────────────────

/// Configuration of a [`FileSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSinkConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_format")]
    pub format: FileFormat,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: RotationStrategy,
    /// Bytes per file for `size` rotation.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Events per file for `events` rotation.
    #[serde(default = "default_max_events")]
    pub max_events: u64,
    /// Seconds per file for `time` rotation.
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
    /// Gzip data files.
    #[serde(default)]
    pub compress: bool,
    /// Write buffer capacity in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maintain the JSONL index under `index/`.
    #[serde(default)]
    pub create_index: bool,
}

fn default_output_dir() -> PathBuf { PathBuf::from("./output") }
fn default_format() -> FileFormat { FileFormat::Jsonl }
fn default_file_prefix() -> String { "events".into() }
fn default_rotation() -> RotationStrategy { RotationStrategy::Size }
fn default_max_file_size() -> u64 { 100 * 1024 * 1024 }
fn default_max_events() -> u64 { 10_000 }
fn default_rotation_interval_secs() -> u64 { 3_600 }
fn default_buffer_size() -> usize { 64 * 1024 }

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: default_format(),
            file_prefix: default_file_prefix(),
            rotation: default_rotation(),
            max_file_size: default_max_file_size(),
            max_events: default_max_events(),
            rotation_interval_secs: default_rotation_interval_secs(),
            compress: false,
            buffer_size: default_buffer_size(),
            create_index: false,
        }
    }
}

impl FileSinkConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn rotate_by_size(mut self, max_file_size: u64) -> Self {
        self.rotation = RotationStrategy::Size;
        self.max_file_size = max_file_size;
        self
    }

    pub fn rotate_by_events(mut self, max_events: u64) -> Self {
        self.rotation = RotationStrategy::Events;
        self.max_events = max_events;
        self
    }

    pub fn rotate_by_time(mut self, interval: Duration) -> Self {
        self.rotation = RotationStrategy::Time;
        self.rotation_interval_secs = interval.as_secs();
        self
    }

    pub fn rotate_daily(mut self) -> Self {
        self.rotation = RotationStrategy::Daily;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_index(mut self, create_index: bool) -> Self {
        self.create_index = create_index;
        self
    }

    pub fn policy(&self) -> RotationPolicy {
        RotationPolicy {
            strategy: self.rotation,
            max_file_size: self.max_file_size,
            max_events: self.max_events,
            interval: Duration::from_secs(self.rotation_interval_secs),
        }
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.file_prefix.is_empty() {
            return Err(SinkError::config("file_prefix must not be empty"));
        }
        match self.rotation {
            RotationStrategy::Size if self.max_file_size == 0 => {
                Err(SinkError::config("max_file_size must be positive"))
            }
            RotationStrategy::Events if self.max_events == 0 => {
                Err(SinkError::config("max_events must be positive"))
            }
            RotationStrategy::Time if self.rotation_interval_secs == 0 => {
                Err(SinkError::config("rotation_interval_secs must be positive"))
            }
            _ => Ok(()),
        }
    }
}

// ─── State ────────────────────────────────────────────────────────────────────

struct OpenFile {
    output: Output,
    state: RotationState,
}

/// Everything guarded by the sink mutex.
struct FileState {
    config: FileSinkConfig,
    policy: RotationPolicy,
    layout: Layout,
    current: Option<OpenFile>,
    index: Option<IndexWriter>,
    sequence: u64,
    files_written: u64,
    started_at: DateTime<Utc>,
}

impl FileState {
    fn new(config: FileSinkConfig) -> Self {
        Self {
            policy: config.policy(),
            layout: Layout::new(config.output_dir.clone()),
            config,
            current: None,
            index: None,
            sequence: 0,
            files_written: 0,
            started_at: Utc::now(),
        }
    }

    fn open_new_file(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        // Skip names left by an earlier run in the same second.
        let (name, path) = loop {
            self.sequence += 1;
            let name = file_name(
                &self.config.file_prefix,
                now,
                self.sequence,
                self.config.format,
                self.config.compress,
            );
            let path = self.layout.current_dir().join(&name);
            if !path.exists() && !self.layout.archive_dir(now).join(&name).exists() {
                break (name, path);
            }
        };
        let mut output = Output::create(&path, self.config.compress, self.config.buffer_size)
            .map_err(|e| io_error("open", &path, e))?;

        let header = self.config.format.header();
        output.write_all(&header).map_err(|e| io_error("write header", &path, e))?;

        let mut state = RotationState::new(name, path, now);
        state.size_bytes = header.len() as u64;
        debug!(sink = SINK_NAME, file = %state.file_name, "opened file");
        self.current = Some(OpenFile { output, state });
        Ok(())
    }

    /// Finish the current file and move it to the archive.
    ///
    /// A failed footer write keeps the file open. Once finishing starts the
    /// handle is gone, so later failures leave the file in `current/`.
    fn close_current_file(&mut self) -> Result<(), SinkError> {
        let footer = self.config.format.footer();
        let Some(file) = self.current.as_mut() else {
            return Ok(());
        };
        file.output
            .write_all(footer)
            .map_err(|e| io_error("write footer", &file.state.path, e))?;

        let Some(OpenFile { output, state }) = self.current.take() else {
            return Ok(());
        };
        if let Err(e) = output.finish() {
            warn!(sink = SINK_NAME, file = %state.path.display(), error = %e, "file left in current/");
            return Err(io_error("finish", &state.path, e));
        }
        let archived = match self.layout.archive(&state.file_name, state.started_at) {
            Ok(archived) => archived,
            Err(e) => {
                warn!(sink = SINK_NAME, file = %state.path.display(), error = %e, "file left in current/");
                return Err(io_error("archive", &state.path, e));
            }
        };
        self.files_written += 1;
        info!(
            sink = SINK_NAME,
            file = %state.file_name,
            events = state.events,
            bytes = state.size_bytes,
            archived = %archived.display(),
            "file archived"
        );
        Ok(())
    }

    fn rotate(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        self.close_current_file()?;
        self.open_new_file(now)
    }

    fn rotate_if_due(&mut self, now: DateTime<Utc>) -> Result<bool, SinkError> {
        let due = self
            .current
            .as_ref()
            .is_some_and(|f| self.policy.should_rotate(&f.state, now));
        if due {
            self.rotate(now)?;
        }
        Ok(due)
    }

    fn append(&mut self, event: &Event, now: DateTime<Utc>) -> Result<(), SinkError> {
        if self.current.is_none() {
            self.open_new_file(now)?;
        } else {
            self.rotate_if_due(now)?;
        }

        let format = self.config.format;
        let record = format.encode(event)?;
        let file = self
            .current
            .as_mut()
            .ok_or_else(|| SinkError::write(SINK_NAME, "no open file"))?;

        if file.state.events > 0 {
            let separator = format.separator();
            file.output
                .write_all(separator)
                .map_err(|e| io_error("write", &file.state.path, e))?;
            file.state.size_bytes += separator.len() as u64;
        }

        let offset = file.state.size_bytes;
        file.output
            .write_all(&record)
            .map_err(|e| io_error("write", &file.state.path, e))?;
        file.state.size_bytes += record.len() as u64;
        file.state.events += 1;

        if let Some(index) = self.index.as_mut() {
            let entry = IndexEntry {
                file: file.state.file_name.clone(),
                offset,
                block_number: event.block_number,
                tx_hash: event.tx_hash_hex(),
            };
            index
                .append(&entry)
                .map_err(|e| io_error("index", index.path(), e))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(file) = self.current.as_mut() {
            file.output
                .flush()
                .map_err(|e| io_error("flush", &file.state.path, e))?;
        }
        if let Some(index) = self.index.as_mut() {
            index.flush().map_err(|e| io_error("flush", index.path(), e))?;
        }
        Ok(())
    }

    fn write_metadata(&self, stats: SinkStatistics, status: &str) -> Result<(), SinkError> {
        let metadata = serde_json::json!({
            "sink": SINK_NAME,
            "status": status,
            "config": self.config,
            "started_at": self.started_at.to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339(),
            "files_written": self.files_written,
            "current_file": self.current.as_ref().map(|f| f.state.file_name.clone()),
            "statistics": stats,
        });
        let path = self
            .layout
            .metadata_dir()
            .join(format!("{}_metadata.json", self.config.file_prefix));
        let bytes = serde_json::to_vec_pretty(&metadata)?;
        std::fs::write(&path, bytes).map_err(|e| io_error("write metadata", &path, e))
    }
}

fn io_error(op: &str, path: &std::path::Path, e: std::io::Error) -> SinkError {
    SinkError::write(SINK_NAME, format!("{op} {}: {e}", path.display()))
}

// ─── FileSink ─────────────────────────────────────────────────────────────────

/// Writes events to rotating files under `output_dir`.
pub struct FileSink {
    config: FileSinkConfig,
    state: Arc<Mutex<FileState>>,
    counters: Arc<SinkCounters>,
    worker: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    span: Span,
    initialized: bool,
    closed: bool,
}

impl FileSink {
    pub fn new(config: FileSinkConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(FileState::new(config.clone()))),
            config,
            counters: Arc::new(SinkCounters::new()),
            worker: None,
            shutdown: CancellationToken::new(),
            span: tracing::info_span!("sink", sink = SINK_NAME),
            initialized: false,
            closed: false,
        }
    }

    /// Replace the logging span the rotation worker runs in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &FileSinkConfig {
        &self.config
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.config.output_dir.clone())
    }

    /// Name of the file currently open in `current/`.
    pub async fn current_file(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|f| f.state.file_name.clone())
    }
}

async fn rotation_worker(
    state: Arc<Mutex<FileState>>,
    counters: Arc<SinkCounters>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let mut guard = state.lock().await;
                match guard.rotate_if_due(Utc::now()) {
                    Ok(true) => debug!(sink = SINK_NAME, "time rotation"),
                    Ok(false) => {}
                    Err(e) => {
                        counters.record_error();
                        warn!(sink = SINK_NAME, error = %e, "time rotation failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn initialize(&mut self) -> Result<(), SinkError> {
        self.config.validate().map_err(|e| SinkError::init(SINK_NAME, e))?;

        {
            let mut state = self.state.lock().await;
            state
                .layout
                .create(self.config.create_index)
                .map_err(|e| SinkError::init(SINK_NAME, format!("create directories: {e}")))?;
            if self.config.create_index {
                let index = IndexWriter::open(&state.layout.index_dir(), &self.config.file_prefix)
                    .map_err(|e| SinkError::init(SINK_NAME, format!("open index: {e}")))?;
                state.index = Some(index);
            }
            state
                .open_new_file(Utc::now())
                .map_err(|e| SinkError::init(SINK_NAME, e))?;
            state
                .write_metadata(self.counters.snapshot(), "running")
                .map_err(|e| SinkError::init(SINK_NAME, e))?;
        }
        self.initialized = true;

        let policy = self.config.policy();
        if policy.strategy.is_time_driven() {
            let worker = rotation_worker(
                Arc::clone(&self.state),
                Arc::clone(&self.counters),
                policy.check_period(),
                self.shutdown.clone(),
            );
            self.worker = Some(tokio::spawn(worker.instrument(self.span.clone())));
        }

        info!(
            sink = SINK_NAME,
            dir = %self.config.output_dir.display(),
            format = %self.config.format,
            rotation = %self.config.rotation,
            compress = self.config.compress,
            "file sink initialized"
        );
        Ok(())
    }

    async fn write(&mut self, events: &[Event], cancel: &CancellationToken) -> Result<(), SinkError> {
        if !self.initialized || self.closed {
            return Err(SinkError::NotInitialized { sink: SINK_NAME.into() });
        }
        if events.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let mut written = 0u64;
        let mut result = Ok(());
        for event in events {
            if cancel.is_cancelled() {
                result = Err(SinkError::Cancelled { sink: SINK_NAME.into() });
                break;
            }
            if let Err(e) = state.append(event, Utc::now()) {
                result = Err(e);
                break;
            }
            written += 1;
        }
        let flushed = state.flush();
        drop(state);

        match result.and(flushed) {
            Ok(()) => {
                self.counters.record_batch(written);
                Ok(())
            }
            Err(e) => {
                self.counters.record_events(written);
                self.counters.record_error();
                warn!(sink = SINK_NAME, written, events = events.len(), error = %e, "file write failed");
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(sink = SINK_NAME, error = %e, "rotation worker panicked");
            }
        }
        if !self.initialized {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let closed = state.close_current_file();
        if let Some(index) = state.index.as_mut() {
            if let Err(e) = index.flush() {
                warn!(sink = SINK_NAME, error = %e, "index flush failed");
            }
        }
        state.index = None;
        let stats = self.counters.snapshot();
        let metadata = state.write_metadata(stats, "closed");

        info!(
            sink = SINK_NAME,
            total_events = stats.total_events,
            files = state.files_written,
            errors = stats.errors,
            "file sink closed"
        );
        closed
            .and(metadata)
            .map_err(|e| SinkError::close(SINK_NAME, e))
    }

    fn statistics(&self) -> SinkStatistics {
        self.counters.snapshot()
    }
}
