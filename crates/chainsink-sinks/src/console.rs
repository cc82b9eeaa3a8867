//! Console sink: prints each batch as a human-readable transaction listing.

use std::io::{self, Write};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Span};

use chainsink_core::decode::{decode_log, EventKind};
use chainsink_core::types::{address_hex, hex_prefixed, Event, Log, TxStatus};
use chainsink_core::{Sink, SinkCounters, SinkError, SinkStatistics};

/// Writes events to stdout (or any injected writer).
pub struct ConsoleSink {
    out: Box<dyn Write + Send + Sync>,
    counters: SinkCounters,
    span: Span,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Print to `out` instead of stdout.
    pub fn with_writer(out: impl Write + Send + Sync + 'static) -> Self {
        Self {
            out: Box::new(out),
            counters: SinkCounters::new(),
            span: tracing::info_span!("sink", sink = "console"),
        }
    }

    /// Log inside `span` instead of the default `sink` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn render(&mut self, events: &[Event]) -> io::Result<()> {
        if events.is_empty() {
            writeln!(self.out, "   No transactions found")?;
            writeln!(self.out)?;
            return Ok(());
        }

        writeln!(self.out)?;
        writeln!(self.out, "   Transactions ({} found):", events.len())?;
        for (i, event) in events.iter().enumerate() {
            self.render_event(i + 1, event)?;
        }
        writeln!(self.out)
    }

    fn render_event(&mut self, position: usize, event: &Event) -> io::Result<()> {
        let status = match event.status {
            TxStatus::Success => "Success",
            TxStatus::Failed => "Failed",
        };
        writeln!(self.out, "   [{position}] Transaction details:")?;
        writeln!(self.out, "       Block: #{}", event.block_number)?;
        writeln!(self.out, "       Hash: {}", event.tx_hash_hex())?;
        writeln!(self.out, "       Status: {status}")?;
        writeln!(self.out, "       Gas used: {}", event.gas_used)?;
        for log in &event.logs {
            self.render_log(log)?;
        }
        Ok(())
    }

    fn render_log(&mut self, log: &Log) -> io::Result<()> {
        let Some(signature) = log.topics.first() else {
            return Ok(());
        };

        let decoded = decode_log(log);
        let (from_label, to_label) = match decoded.kind {
            EventKind::Transfer => ("From", "To"),
            EventKind::Approval => ("Owner", "Spender"),
            EventKind::Unknown => {
                let topic = hex_prefixed(signature);
                return writeln!(self.out, "       Event: Unknown (topic: {}...)", &topic[..10]);
            }
        };

        writeln!(self.out, "       Event: {}", decoded.kind)?;
        if let (Some(from), Some(to)) = (decoded.from, decoded.to) {
            writeln!(self.out, "         {from_label}: {}", address_hex(&from))?;
            writeln!(self.out, "         {to_label}: {}", address_hex(&to))?;
        }
        if let Some(value) = decoded.value {
            writeln!(self.out, "         Value: {value}")?;
        }
        Ok(())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn initialize(&mut self) -> Result<(), SinkError> {
        info!(parent: &self.span, "console sink initialized");
        Ok(())
    }

    async fn write(&mut self, events: &[Event], _cancel: &CancellationToken) -> Result<(), SinkError> {
        match self.render(events).and_then(|()| self.out.flush()) {
            Ok(()) => {
                self.counters.record_batch(events.len() as u64);
                Ok(())
            }
            Err(e) => {
                self.counters.record_error();
                warn!(parent: &self.span, events = events.len(), error = %e, "console write failed");
                Err(SinkError::write("console", e))
            }
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.out.flush().map_err(|e| SinkError::close("console", e))
    }

    fn statistics(&self) -> SinkStatistics {
        self.counters.snapshot()
    }
}
