//! Fan-out of event batches to every registered sink.
//!
//! The manager owns its sinks exclusively. Only initialization failures are
//! escalated; write and close failures stay with the sink that produced them.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::SinkError;
use crate::sink::{Sink, SinkStatistics};
use crate::types::Event;

/// Ordered set of sinks sharing one event stream.
pub struct SinkManager {
    sinks: Vec<Box<dyn Sink>>,
    span: Span,
}

impl SinkManager {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            span: tracing::info_span!("sink_manager"),
        }
    }

    /// Log inside `span` instead of the default `sink_manager` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Register a sink. Registration order is fan-out order.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        debug!(parent: &self.span, sink = sink.name(), "sink registered");
        self.sinks.push(sink);
    }

    /// Initialize sinks in order, stopping at the first failure.
    pub async fn initialize(&mut self) -> Result<(), SinkError> {
        let span = self.span.clone();
        for sink in self.sinks.iter_mut() {
            let name = sink.name().to_string();
            if let Err(e) = sink.initialize().instrument(span.clone()).await {
                warn!(parent: &span, sink = %name, error = %e, "sink initialization failed");
                return Err(e);
            }
            info!(parent: &span, sink = %name, "sink initialized");
        }
        Ok(())
    }

    /// Hand `events` to every sink in order. Per-sink failures are logged and
    /// never reach the caller.
    pub async fn write(&mut self, events: &[Event], cancel: &CancellationToken) {
        let span = self.span.clone();
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.write(events, cancel).instrument(span.clone()).await {
                warn!(
                    parent: &span,
                    sink = sink.name(),
                    events = events.len(),
                    error = %e,
                    "sink write failed"
                );
            }
        }
    }

    /// Close every sink, even after earlier failures. Returns the errors
    /// collected along the way.
    pub async fn close(&mut self) -> Vec<SinkError> {
        let span = self.span.clone();
        let mut errors = Vec::new();
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.close().instrument(span.clone()).await {
                warn!(parent: &span, sink = sink.name(), error = %e, "sink close failed");
                errors.push(e);
            }
        }
        info!(parent: &span, sinks = self.sinks.len(), failed = errors.len(), "sinks closed");
        errors
    }

    pub fn has_sink(&self, name: &str) -> bool {
        self.sinks.iter().any(|s| s.name() == name)
    }

    /// Names in registration order.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// `(name, statistics)` per sink, in registration order.
    pub fn statistics(&self) -> Vec<(String, SinkStatistics)> {
        self.sinks
            .iter()
            .map(|s| (s.name().to_string(), s.statistics()))
            .collect()
    }
}

impl std::fmt::Debug for SinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkManager")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

impl Default for SinkManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NamedSink(&'static str);

    #[async_trait]
    impl Sink for NamedSink {
        fn name(&self) -> &str {
            self.0
        }
        async fn initialize(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
        async fn write(&mut self, _: &[Event], _: &CancellationToken) -> Result<(), SinkError> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
        fn statistics(&self) -> SinkStatistics {
            SinkStatistics::default()
        }
    }

    #[test]
    fn has_sink_by_name() {
        let mut manager = SinkManager::new();
        manager.add_sink(Box::new(NamedSink("console")));
        manager.add_sink(Box::new(NamedSink("filesystem")));

        assert!(manager.has_sink("console"));
        assert!(!manager.has_sink("kafka"));
        assert_eq!(manager.sink_names(), vec!["console", "filesystem"]);
        assert_eq!(manager.statistics().len(), 2);
    }

    /// Fails every lifecycle call; counts the calls it received.
    struct FailingSink {
        calls: Arc<AtomicUsize>,
        fail_init: bool,
    }

    #[async_trait]
    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }
        async fn initialize(&mut self) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(SinkError::init("failing", "connection refused"));
            }
            Ok(())
        }
        async fn write(&mut self, _: &[Event], _: &CancellationToken) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::write("failing", "rejected"))
        }
        async fn close(&mut self) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::write("failing", "already gone"))
        }
        fn statistics(&self) -> SinkStatistics {
            SinkStatistics::default()
        }
    }

    #[tokio::test]
    async fn failures_are_logged_and_contained() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = SinkManager::new();
        manager.add_sink(Box::new(FailingSink {
            calls: Arc::clone(&calls),
            fail_init: false,
        }));
        manager.add_sink(Box::new(NamedSink("console")));

        manager.initialize().await.unwrap();
        manager.write(&[], &CancellationToken::new()).await;
        let errors = manager.close().await;

        assert_eq!(errors.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn initialize_stops_at_first_failure() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = SinkManager::new();
        manager.add_sink(Box::new(FailingSink {
            calls: Arc::clone(&calls),
            fail_init: true,
        }));
        manager.add_sink(Box::new(NamedSink("console")));

        let err = manager.initialize().await.unwrap_err();
        assert!(err.is_init());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(format!("{manager:?}"), r#"SinkManager { sinks: ["failing", "console"] }"#);
    }

    #[tokio::test]
    async fn empty_manager_is_a_no_op() {
        let mut manager = SinkManager::default();
        manager.initialize().await.unwrap();
        manager.write(&[], &CancellationToken::new()).await;
        assert!(manager.close().await.is_empty());
    }
}
