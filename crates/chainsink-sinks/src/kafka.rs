//! Kafka sink: one JSON message per transaction, keyed by tx hash.
//!
//! With `logs_topic` set, every log is additionally published to that topic
//! keyed `<tx_hash>:<log_index>`. A batch is published concurrently and
//! counts as failed if any message is not acknowledged; the retried batch is
//! republished in full, so consumers should treat the key as idempotent.
//!
//! # Feature Flag
//! Requires the `kafka` feature (builds librdkafka, needs cmake).

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use chainsink_core::record::{EventRecord, LogRecord};
use chainsink_core::types::Event;
use chainsink_core::{BatchWriter, BatchedSink, FlushPolicy, SinkError};

const SINK_NAME: &str = "kafka";

const COMPRESSION_CODECS: [&str; 5] = ["none", "gzip", "snappy", "lz4", "zstd"];
const ACK_LEVELS: [&str; 4] = ["0", "1", "all", "-1"];

/// A batched Kafka sink.
pub type KafkaSink = BatchedSink<KafkaWriter>;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Optional per-log topic.
    #[serde(default)]
    pub logs_topic: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// `none` | `gzip` | `snappy` | `lz4` | `zstd`
    #[serde(default = "default_compression")]
    pub compression: String,
    /// `0` | `1` | `all`
    #[serde(default = "default_acks")]
    pub required_acks: String,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default)]
    pub flush: FlushPolicy,
}

fn default_brokers() -> Vec<String> { vec!["localhost:9092".into()] }
fn default_topic() -> String { "usdc-events".into() }
fn default_client_id() -> String { "chainsink".into() }
fn default_compression() -> String { "snappy".into() }
fn default_acks() -> String { "all".into() }
fn default_message_timeout_ms() -> u64 { 30_000 }

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            logs_topic: None,
            client_id: default_client_id(),
            compression: default_compression(),
            required_acks: default_acks(),
            message_timeout_ms: default_message_timeout_ms(),
            flush: FlushPolicy::default(),
        }
    }
}

impl KafkaConfig {
    pub fn new(brokers: impl IntoIterator<Item = impl Into<String>>, topic: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_logs_topic(mut self, topic: impl Into<String>) -> Self {
        self.logs_topic = Some(topic.into());
        self
    }

    pub fn with_compression(mut self, codec: impl Into<String>) -> Self {
        self.compression = codec.into();
        self
    }

    pub fn with_required_acks(mut self, acks: impl Into<String>) -> Self {
        self.required_acks = acks.into();
        self
    }

    pub fn with_flush_policy(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(SinkError::config("at least one kafka broker is required"));
        }
        if self.topic.is_empty() {
            return Err(SinkError::config("kafka topic is required"));
        }
        if !COMPRESSION_CODECS.contains(&self.compression.as_str()) {
            return Err(SinkError::config(format!(
                "unknown kafka compression '{}'",
                self.compression
            )));
        }
        if !ACK_LEVELS.contains(&self.required_acks.as_str()) {
            return Err(SinkError::config(format!(
                "unknown kafka acks '{}'",
                self.required_acks
            )));
        }
        self.flush.validate()
    }

    /// librdkafka producer settings.
    pub fn client_settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("bootstrap.servers", self.brokers.join(",")),
            ("client.id", self.client_id.clone()),
            ("compression.type", self.compression.clone()),
            ("acks", self.required_acks.clone()),
            ("message.timeout.ms", self.message_timeout_ms.to_string()),
        ]
    }

    fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// Build a batched Kafka sink.
pub fn sink(config: KafkaConfig) -> KafkaSink {
    let policy = config.flush.clone();
    BatchedSink::new(SINK_NAME, KafkaWriter::new(config), policy)
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// Payload published to `logs_topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub block_number: u64,
    pub tx_hash: String,
    #[serde(flatten)]
    pub log: LogRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Messages produced for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRecord {
    pub event: Message,
    pub logs: Vec<Message>,
}

/// Encode an event; log messages are only built when `with_logs` is set.
pub fn encode_event(event: &Event, with_logs: bool) -> Result<KafkaRecord, SinkError> {
    let record = EventRecord::from_event(event);
    let logs = if with_logs {
        record
            .logs
            .iter()
            .map(|log| {
                let message = LogMessage {
                    block_number: record.block_number,
                    tx_hash: record.tx_hash.clone(),
                    log: log.clone(),
                };
                Ok(Message {
                    key: format!("{}:{}", record.tx_hash, log.log_index),
                    payload: serde_json::to_vec(&message)?,
                })
            })
            .collect::<Result<Vec<_>, SinkError>>()?
    } else {
        Vec::new()
    };
    Ok(KafkaRecord {
        event: Message {
            key: record.tx_hash.clone(),
            payload: serde_json::to_vec(&record)?,
        },
        logs,
    })
}

// ─── KafkaWriter ──────────────────────────────────────────────────────────────

/// Producer backend of [`KafkaSink`].
pub struct KafkaWriter {
    config: KafkaConfig,
    producer: Option<FutureProducer>,
}

impl KafkaWriter {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config, producer: None }
    }

    fn producer(&self) -> Result<&FutureProducer, SinkError> {
        self.producer
            .as_ref()
            .ok_or_else(|| SinkError::NotInitialized { sink: SINK_NAME.into() })
    }
}

#[async_trait]
impl BatchWriter for KafkaWriter {
    type Record = KafkaRecord;

    async fn connect(&mut self) -> Result<(), SinkError> {
        self.config.validate().map_err(|e| SinkError::init(SINK_NAME, e))?;

        let mut client = ClientConfig::new();
        for (key, value) in self.config.client_settings() {
            client.set(key, value);
        }
        let producer: FutureProducer = client
            .create()
            .map_err(|e| SinkError::init(SINK_NAME, format!("create producer: {e}")))?;

        // Metadata fetch blocks; it doubles as the broker reachability check.
        let probe = producer.clone();
        let topic = self.config.topic.clone();
        let timeout = self.config.message_timeout();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(Some(topic.as_str()), Timeout::After(timeout))
                .map(|_| ())
        })
        .await
        .map_err(|e| SinkError::init(SINK_NAME, format!("metadata probe: {e}")))?
        .map_err(|e| SinkError::init(SINK_NAME, format!("brokers unreachable: {e}")))?;

        info!(
            sink = SINK_NAME,
            brokers = %self.config.brokers.join(","),
            topic = %self.config.topic,
            logs_topic = ?self.config.logs_topic,
            "kafka producer connected"
        );
        self.producer = Some(producer);
        Ok(())
    }

    fn encode(&self, event: &Event) -> Result<KafkaRecord, SinkError> {
        encode_event(event, self.config.logs_topic.is_some())
    }

    async fn write_batch(&self, records: &[KafkaRecord]) -> Result<(), SinkError> {
        let producer = self.producer()?;
        let timeout = Timeout::After(self.config.message_timeout());

        let mut sends = Vec::new();
        for record in records {
            sends.push(producer.send(
                FutureRecord::to(&self.config.topic)
                    .key(&record.event.key)
                    .payload(&record.event.payload),
                timeout,
            ));
            if let Some(logs_topic) = &self.config.logs_topic {
                for log in &record.logs {
                    sends.push(producer.send(
                        FutureRecord::to(logs_topic).key(&log.key).payload(&log.payload),
                        timeout,
                    ));
                }
            }
        }

        let total = sends.len();
        let mut failed = 0usize;
        let mut first_error = None;
        for result in join_all(sends).await {
            if let Err((e, _message)) = result {
                failed += 1;
                first_error.get_or_insert_with(|| e.to_string());
            }
        }

        if let Some(reason) = first_error {
            warn!(sink = SINK_NAME, failed, total, "messages not acknowledged");
            return Err(SinkError::Flush {
                sink: SINK_NAME.into(),
                records: records.len(),
                reason: format!("{failed} of {total} messages failed, first: {reason}"),
            });
        }
        debug!(sink = SINK_NAME, messages = total, "batch published");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SinkError> {
        let Some(producer) = self.producer.clone() else {
            return Ok(());
        };
        let timeout = self.config.message_timeout();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::close(SINK_NAME, e))?
            .map_err(|e| SinkError::close(SINK_NAME, format!("flush producer: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_core::alloy_primitives::{Address, Bytes, B256};
    use chainsink_core::types::{Log, TxStatus};

    fn event() -> Event {
        Event {
            block_number: 77,
            tx_hash: B256::repeat_byte(0xcd),
            tx_index: 1,
            status: TxStatus::Failed,
            gas_used: 90_000,
            logs: (0..2)
                .map(|i| Log {
                    address: Address::repeat_byte(0x01),
                    topics: vec![B256::repeat_byte(0x09)],
                    data: Bytes::new(),
                    log_index: 10 + i,
                    tx_index: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn event_message_is_keyed_by_tx_hash() {
        let record = encode_event(&event(), false).unwrap();
        let tx = format!("0x{}", "cd".repeat(32));
        assert_eq!(record.event.key, tx);
        assert!(record.logs.is_empty());

        let payload: serde_json::Value = serde_json::from_slice(&record.event.payload).unwrap();
        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["log_count"], 2);
    }

    #[test]
    fn log_messages_are_keyed_by_tx_and_index() {
        let record = encode_event(&event(), true).unwrap();
        let tx = format!("0x{}", "cd".repeat(32));
        let keys: Vec<&str> = record.logs.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec![format!("{tx}:10"), format!("{tx}:11")]);

        let payload: serde_json::Value = serde_json::from_slice(&record.logs[0].payload).unwrap();
        assert_eq!(payload["block_number"], 77);
        assert_eq!(payload["event_type"], "Unknown");
    }

    #[test]
    fn validation_rejects_unknown_settings() {
        assert!(KafkaConfig::default().validate().is_ok());
        assert!(KafkaConfig::default().with_compression("brotli").validate().is_err());
        assert!(KafkaConfig::default().with_required_acks("2").validate().is_err());
        assert!(KafkaConfig::new(Vec::<String>::new(), "t").validate().is_err());
    }

    #[test]
    fn client_settings_join_brokers() {
        let config = KafkaConfig::new(["a:9092", "b:9092"], "usdc");
        let settings = config.client_settings();
        assert!(settings.contains(&("bootstrap.servers", "a:9092,b:9092".to_string())));
        assert!(settings.contains(&("acks", "all".to_string())));
    }

    #[tokio::test]
    #[ignore = "requires Kafka (set KAFKA_BROKERS to enable)"]
    async fn publishes_to_live_broker() {
        use chainsink_core::{CancellationToken, Sink};

        let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".into());
        let config = KafkaConfig::new([brokers], "chainsink-test").with_logs_topic("chainsink-test-logs");
        let mut sink = sink(config);
        sink.initialize().await.unwrap();
        sink.write(&[event()], &CancellationToken::new()).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(sink.statistics().total_events, 1);
    }
}
