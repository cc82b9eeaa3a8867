//! The poll loop: fetch the head block, convert it to events, fan out.
//!
//! One cycle per `block_interval`:
//!   - read the head block number
//!   - skip it if it was already processed
//!   - fetch its events and hand them to the [`SinkManager`]
//!
//! Source errors are transient: they are logged and the next cycle retries.
//! Sink write errors never reach the loop. Cancelling the token stops the
//! loop, after which every sink is closed (final flushes included).

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chainsink_core::SinkManager;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::sinks::build_manager;
use crate::source::EventSource;

/// Counters kept across the tracker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub polls: u64,
    pub blocks_processed: u64,
    pub events: u64,
    pub errors: u64,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Processed { block: u64, events: usize },
    /// Head has not moved since the last processed block.
    AlreadySeen { block: u64 },
}

pub struct Tracker<S: EventSource> {
    config: TrackerConfig,
    source: S,
    manager: SinkManager,
    last_processed: Option<u64>,
    stats: TrackerStats,
}

impl<S: EventSource> Tracker<S> {
    pub fn new(config: TrackerConfig, source: S, manager: SinkManager) -> Self {
        Self {
            config,
            source,
            manager,
            last_processed: None,
            stats: TrackerStats::default(),
        }
    }

    /// Build the sink manager from `config.sinks` through the default registry.
    pub fn from_config(config: TrackerConfig, source: S) -> Result<Self, TrackerError> {
        let manager = build_manager(&config)?;
        Ok(Self::new(config, source, manager))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn manager(&self) -> &SinkManager {
        &self.manager
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    /// Banner lines go to stdout only next to the console sink's output.
    fn console_active(&self) -> bool {
        self.manager.has_sink("console")
    }

    /// Run until `cancel` fires. Sinks are initialized first and always closed
    /// before returning, including after a failed initialization.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<TrackerStats, TrackerError> {
        let chain_id = self.source.chain_id().await?;
        self.print_connection_info(chain_id);

        if let Err(e) = self.manager.initialize().await {
            error!(error = %e, "failed to initialize sinks");
            self.manager.close().await;
            return Err(e.into());
        }
        self.print_active_sinks();

        self.poll_loop(&cancel).await;

        let close_errors = self.manager.close().await;
        if !close_errors.is_empty() {
            warn!(failed = close_errors.len(), "some sinks failed to close cleanly");
        }
        info!(
            polls = self.stats.polls,
            blocks = self.stats.blocks_processed,
            events = self.stats.events,
            errors = self.stats.errors,
            "tracker stopped"
        );
        Ok(self.stats)
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken) {
        let interval = self.config.block_interval;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.poll_once(cancel).await {
                self.stats.errors += 1;
                warn!(error = %e, transient = e.is_transient(), "error processing block");
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One cycle: process the head block unless it was already processed.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<PollOutcome, TrackerError> {
        self.stats.polls += 1;
        let block = self.source.latest_block().await?;

        if self.last_processed.is_some_and(|last| block <= last) {
            debug!(block, "no new block");
            return Ok(PollOutcome::AlreadySeen { block });
        }

        if self.console_active() {
            println!("Processing block #{block}");
        }
        let events = self.source.events_in_block(block).await?;
        debug!(block, events = events.len(), "dispatching events");

        self.manager.write(&events, cancel).await;

        self.last_processed = Some(block);
        self.stats.blocks_processed += 1;
        self.stats.events += events.len() as u64;
        Ok(PollOutcome::Processed {
            block,
            events: events.len(),
        })
    }

    fn print_connection_info(&self, chain_id: u64) {
        info!(
            network = %self.config.network,
            chain_id,
            contract = %self.config.contract_address,
            interval_secs = self.config.block_interval.as_secs(),
            "connected to node"
        );
        if self.console_active() {
            println!("Connected to Ethereum network ({})", self.config.network);
            println!("   Chain ID: {chain_id}");
            println!("   USDC Address: {}", self.config.contract_address);
            println!("   Block Interval: {:?}", self.config.block_interval);
        }
    }

    fn print_active_sinks(&self) {
        let names = self.manager.sink_names().join(", ");
        info!(sinks = %names, "sinks active");
        if self.console_active() {
            println!("Active sinks: {names}");
            println!();
        }
    }
}
