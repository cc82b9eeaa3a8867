//! Elasticsearch sink over the HTTP bulk API.
//!
//! One document per transaction, `_id` = tx hash, so a batch retried after a
//! failed bulk request overwrites instead of duplicating. Documents land in
//! `<prefix>` or, with `use_timestamp_suffix`, `<prefix>-YYYY.MM.DD` by the
//! document's UTC timestamp. An index template covering `<prefix>-*` is put on
//! initialize.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use chainsink_core::record::{EventRecord, LogRecord};
use chainsink_core::types::Event;
use chainsink_core::{BatchWriter, BatchedSink, FlushPolicy, SinkError};

const SINK_NAME: &str = "elasticsearch";

/// A batched Elasticsearch sink.
pub type ElasticsearchSink = BatchedSink<ElasticsearchWriter>;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Cluster endpoints, tried in order.
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    /// Write to daily indices `<prefix>-YYYY.MM.DD`.
    #[serde(default = "default_true")]
    pub use_timestamp_suffix: bool,
    /// Put the index template on initialize.
    #[serde(default = "default_true")]
    pub create_template: bool,
    /// Network name stored on every document.
    #[serde(default)]
    pub network: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub flush: FlushPolicy,
}

fn default_urls() -> Vec<String> { vec!["http://localhost:9200".into()] }
fn default_index_prefix() -> String { "usdc-events".into() }
fn default_true() -> bool { true }
fn default_request_timeout_secs() -> u64 { 30 }

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            username: None,
            password: None,
            index_prefix: default_index_prefix(),
            use_timestamp_suffix: true,
            create_template: true,
            network: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            flush: FlushPolicy::default(),
        }
    }
}

impl ElasticsearchConfig {
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }

    pub fn with_timestamp_suffix(mut self, enabled: bool) -> Self {
        self.use_timestamp_suffix = enabled;
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_flush_policy(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.urls.iter().all(|u| u.trim().is_empty()) {
            return Err(SinkError::config("at least one elasticsearch url is required"));
        }
        if self.index_prefix.is_empty() || self.index_prefix != self.index_prefix.to_lowercase() {
            return Err(SinkError::config("index_prefix must be non-empty and lowercase"));
        }
        self.flush.validate()
    }

    /// Index a document timestamped `at` belongs to.
    pub fn index_name(&self, at: DateTime<Utc>) -> String {
        if self.use_timestamp_suffix {
            format!("{}-{}", self.index_prefix, at.format("%Y.%m.%d"))
        } else {
            self.index_prefix.clone()
        }
    }

    pub fn template_name(&self) -> String {
        format!("{}-template", self.index_prefix)
    }
}

/// Build a batched Elasticsearch sink.
pub fn sink(config: ElasticsearchConfig) -> ElasticsearchSink {
    let policy = config.flush.clone();
    BatchedSink::new(SINK_NAME, ElasticsearchWriter::new(config), policy)
}

// ─── Documents ────────────────────────────────────────────────────────────────

/// Indexed form of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDocument {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_index: u64,
    pub status: u64,
    pub status_text: String,
    pub gas_used: u64,
    pub network: String,
    pub log_count: usize,
    pub events: Vec<LogRecord>,
}

/// One bulk `index` action plus its document.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub index: String,
    pub id: String,
    pub document: EventDocument,
}

/// NDJSON body for `POST /_bulk`.
pub fn bulk_body(items: &[BulkItem]) -> Result<String, SinkError> {
    let mut body = String::new();
    for item in items {
        let action = json!({ "index": { "_index": item.index, "_id": item.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(&item.document)?);
        body.push('\n');
    }
    Ok(body)
}

/// Inspect a bulk response. Returns the number of rejected items and the
/// first rejection reason when `errors` is set.
pub fn bulk_failures(response: &Value) -> Option<(usize, String)> {
    if !response["errors"].as_bool().unwrap_or(false) {
        return None;
    }
    let items = response["items"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let failed: Vec<&Value> = items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .filter(|result| !result["error"].is_null())
        .collect();
    let reason = failed
        .first()
        .map(|r| {
            let error = &r["error"];
            format!(
                "{}: {}",
                error["type"].as_str().unwrap_or("unknown"),
                error["reason"].as_str().unwrap_or("no reason given")
            )
        })
        .unwrap_or_else(|| "bulk response reported errors".into());
    Some((failed.len().max(1), reason))
}

fn index_template(config: &ElasticsearchConfig) -> Value {
    let keyword = json!({ "type": "keyword" });
    json!({
        "index_patterns": [format!("{}-*", config.index_prefix)],
        "template": {
            "settings": {
                "number_of_shards": 1,
                "number_of_replicas": 0,
                "refresh_interval": "5s"
            },
            "mappings": {
                "properties": {
                    "@timestamp": { "type": "date" },
                    "block_number": { "type": "long" },
                    "tx_hash": keyword,
                    "tx_index": { "type": "long" },
                    "status": { "type": "integer" },
                    "status_text": keyword,
                    "gas_used": { "type": "long" },
                    "network": keyword,
                    "log_count": { "type": "integer" },
                    "events": {
                        "type": "nested",
                        "properties": {
                            "event_type": keyword,
                            "address": keyword,
                            "topics": keyword,
                            "data": { "type": "text", "index": false },
                            "log_index": { "type": "long" },
                            "tx_index": { "type": "long" },
                            "from": keyword,
                            "to": keyword,
                            "value": keyword
                        }
                    }
                }
            }
        }
    })
}

// ─── ElasticsearchWriter ──────────────────────────────────────────────────────

/// HTTP backend of [`ElasticsearchSink`].
pub struct ElasticsearchWriter {
    config: ElasticsearchConfig,
    urls: Vec<String>,
    http: Option<reqwest::Client>,
    active: AtomicUsize,
}

impl ElasticsearchWriter {
    pub fn new(config: ElasticsearchConfig) -> Self {
        let urls = config
            .urls
            .iter()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        Self {
            config,
            urls,
            http: None,
            active: AtomicUsize::new(0),
        }
    }

    fn active_url(&self) -> &str {
        &self.urls[self.active.load(Ordering::Relaxed) % self.urls.len()]
    }

    /// Move to the next endpoint after a transport failure.
    fn fail_over(&self) {
        if self.urls.len() > 1 {
            let next = (self.active.load(Ordering::Relaxed) + 1) % self.urls.len();
            self.active.store(next, Ordering::Relaxed);
            warn!(sink = SINK_NAME, url = %self.urls[next], "switching elasticsearch endpoint");
        }
    }

    fn request(
        &self,
        http: &reqwest::Client,
        method: reqwest::Method,
        url: String,
    ) -> reqwest::RequestBuilder {
        let builder = http.request(method, url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_ref()),
            None => builder,
        }
    }

    fn client(&self) -> Result<&reqwest::Client, SinkError> {
        self.http
            .as_ref()
            .ok_or_else(|| SinkError::NotInitialized { sink: SINK_NAME.into() })
    }

    async fn put_template(&self, http: &reqwest::Client) -> Result<(), SinkError> {
        let url = format!("{}/_index_template/{}", self.active_url(), self.config.template_name());
        let resp = self
            .request(http, reqwest::Method::PUT, url)
            .json(&index_template(&self.config))
            .send()
            .await
            .map_err(|e| SinkError::init(SINK_NAME, format!("put index template: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::init(
                SINK_NAME,
                format!("put index template: HTTP {status}: {body}"),
            ));
        }
        info!(sink = SINK_NAME, template = %self.config.template_name(), "index template created");
        Ok(())
    }
}

#[async_trait]
impl BatchWriter for ElasticsearchWriter {
    type Record = BulkItem;

    async fn connect(&mut self) -> Result<(), SinkError> {
        self.config.validate().map_err(|e| SinkError::init(SINK_NAME, e))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()
            .map_err(|e| SinkError::init(SINK_NAME, format!("http client: {e}")))?;

        let mut last_error = String::from("no endpoints");
        let mut reachable = None;
        for (i, url) in self.urls.iter().enumerate() {
            match self.request(&http, reqwest::Method::GET, format!("{url}/")).send().await {
                Ok(resp) if resp.status().is_success() => {
                    reachable = Some(i);
                    break;
                }
                Ok(resp) => last_error = format!("{url}: HTTP {}", resp.status().as_u16()),
                Err(e) => last_error = format!("{url}: {e}"),
            }
        }
        let Some(active) = reachable else {
            return Err(SinkError::init(SINK_NAME, format!("cluster unreachable: {last_error}")));
        };
        self.active.store(active, Ordering::Relaxed);

        if self.config.create_template {
            self.put_template(&http).await?;
        }
        info!(
            sink = SINK_NAME,
            url = %self.active_url(),
            index_prefix = %self.config.index_prefix,
            "connected to elasticsearch"
        );
        self.http = Some(http);
        Ok(())
    }

    fn encode(&self, event: &Event) -> Result<BulkItem, SinkError> {
        let now = Utc::now();
        let record = EventRecord::from_event(event);
        Ok(BulkItem {
            index: self.config.index_name(now),
            id: record.tx_hash.clone(),
            document: EventDocument {
                timestamp: now.to_rfc3339(),
                block_number: record.block_number,
                tx_hash: record.tx_hash,
                tx_index: record.tx_index,
                status: record.status_code,
                status_text: record.status,
                gas_used: record.gas_used,
                network: self.config.network.clone(),
                log_count: record.log_count,
                events: record.logs,
            },
        })
    }

    async fn write_batch(&self, items: &[BulkItem]) -> Result<(), SinkError> {
        let http = self.client()?;
        let n = items.len();
        let flush_error = |reason: String| SinkError::Flush {
            sink: SINK_NAME.into(),
            records: n,
            reason,
        };

        let body = bulk_body(items)?;
        let url = format!("{}/_bulk", self.active_url());
        let resp = self
            .request(http, reqwest::Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                self.fail_over();
                flush_error(format!("bulk request: {e}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(flush_error(format!("bulk request: HTTP {status}: {text}")));
        }

        let response: Value = resp
            .json()
            .await
            .map_err(|e| flush_error(format!("bulk response: {e}")))?;
        if let Some((failed, reason)) = bulk_failures(&response) {
            return Err(flush_error(format!("{failed} of {n} documents rejected, first: {reason}")));
        }

        debug!(sink = SINK_NAME, documents = n, "bulk request indexed");
        Ok(())
    }
}
