//! Sink names understood by the tracker, wired to their constructors.

use tracing::info_span;

use chainsink_core::{Sink, SinkError, SinkManager, SinkRegistry};
use chainsink_sinks::{ConsoleSink, FileSink};

use crate::config::TrackerConfig;

/// Registry of every sink this build can construct.
///
/// `mongodb` is accepted in configuration but has no driver; backends whose
/// cargo feature is disabled take the same path.
pub fn default_registry() -> SinkRegistry<TrackerConfig> {
    let mut registry = SinkRegistry::new();

    registry.register("console", |_config: &TrackerConfig| {
        let sink = ConsoleSink::new().with_span(info_span!("sink", sink = "console"));
        Ok(Box::new(sink) as Box<dyn Sink>)
    });

    registry.register("filesystem", |config: &TrackerConfig| {
        config.file.validate()?;
        let sink = FileSink::new(config.file.clone())
            .with_span(info_span!("sink", sink = "filesystem"));
        Ok(Box::new(sink) as Box<dyn Sink>)
    });

    #[cfg(feature = "postgres")]
    registry.register("sql", |config: &TrackerConfig| {
        let sql = config
            .sql
            .clone()
            .ok_or_else(|| SinkError::config("sql sink selected but SQL_CONNECTION_STRING is not set"))?;
        sql.validate()?;
        let sink = chainsink_sinks::sql::sink(sql).with_span(info_span!("sink", sink = "sql"));
        Ok(Box::new(sink) as Box<dyn Sink>)
    });
    #[cfg(not(feature = "postgres"))]
    registry.mark_unsupported("sql");

    #[cfg(feature = "elasticsearch")]
    registry.register("elasticsearch", |config: &TrackerConfig| {
        config.elasticsearch.validate()?;
        let sink = chainsink_sinks::elasticsearch::sink(config.elasticsearch.clone())
            .with_span(info_span!("sink", sink = "elasticsearch"));
        Ok(Box::new(sink) as Box<dyn Sink>)
    });
    #[cfg(not(feature = "elasticsearch"))]
    registry.mark_unsupported("elasticsearch");

    #[cfg(feature = "kafka")]
    registry.register("kafka", |config: &TrackerConfig| {
        config.kafka.validate()?;
        let sink = chainsink_sinks::kafka::sink(config.kafka.clone())
            .with_span(info_span!("sink", sink = "kafka"));
        Ok(Box::new(sink) as Box<dyn Sink>)
    });
    #[cfg(not(feature = "kafka"))]
    registry.mark_unsupported("kafka");

    registry.mark_unsupported("mongodb");
    registry
}

/// Build the manager for `config.sinks`.
pub fn build_manager(config: &TrackerConfig) -> Result<SinkManager, SinkError> {
    default_registry().build_manager(config.sinks.as_slice(), config)
}
