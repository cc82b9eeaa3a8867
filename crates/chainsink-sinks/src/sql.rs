//! PostgreSQL sink.
//!
//! Events are batched by the core flush engine and committed one transaction
//! per batch. Re-delivered transactions are upserted on `tx_hash`, so a batch
//! retried after a failed commit does not duplicate rows.
//!
//! # Feature Flag
//! Requires the `postgres` feature (on by default).
//!
//! # Schema
//! Created on initialize when `create_tables` is set:
//! - `<schema>.<table>`: one row per transaction, keyed by `tx_hash`
//! - `<schema>.<table>_logs`: one row per log, keyed by `(tx_hash, log_index)`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use chainsink_core::record::{EventRecord, LogRecord};
use chainsink_core::types::Event;
use chainsink_core::{BatchWriter, BatchedSink, FlushPolicy, SinkError};

const SINK_NAME: &str = "sql";

/// A batched Postgres sink.
pub type SqlSink = BatchedSink<SqlWriter>;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub connection_string: String,
    #[serde(default = "default_schema")]
    pub schema_name: String,
    #[serde(default = "default_table")]
    pub table_name: String,
    /// Create schema, tables and indexes on initialize.
    #[serde(default = "default_true")]
    pub create_tables: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub flush: FlushPolicy,
}

fn default_schema() -> String { "public".into() }
fn default_table() -> String { "usdc_events".into() }
fn default_true() -> bool { true }
fn default_max_connections() -> u32 { 10 }
fn default_connect_timeout_secs() -> u64 { 30 }

impl SqlConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            schema_name: default_schema(),
            table_name: default_table(),
            create_tables: true,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            flush: FlushPolicy::default(),
        }
    }

    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema_name = schema.into();
        self.table_name = table.into();
        self
    }

    pub fn with_flush_policy(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.connection_string.is_empty() {
            return Err(SinkError::config("sql connection_string is required"));
        }
        validate_identifier(&self.schema_name)?;
        validate_identifier(&self.table_name)?;
        self.flush.validate()
    }

    /// `schema.table`
    pub fn events_table(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    /// `schema.table_logs`
    pub fn logs_table(&self) -> String {
        format!("{}.{}_logs", self.schema_name, self.table_name)
    }
}

/// Schema and table names are interpolated into SQL, so only plain
/// identifiers are accepted.
fn validate_identifier(name: &str) -> Result<(), SinkError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::config(format!("invalid SQL identifier '{name}'")))
    }
}

/// Build a batched Postgres sink.
pub fn sink(config: SqlConfig) -> SqlSink {
    let policy = config.flush.clone();
    BatchedSink::new(SINK_NAME, SqlWriter::new(config), policy)
}

// ─── SqlWriter ────────────────────────────────────────────────────────────────

/// Postgres backend of [`SqlSink`].
pub struct SqlWriter {
    config: SqlConfig,
    pool: Option<PgPool>,
}

impl SqlWriter {
    pub fn new(config: SqlConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> Result<&PgPool, SinkError> {
        self.pool
            .as_ref()
            .ok_or_else(|| SinkError::NotInitialized { sink: SINK_NAME.into() })
    }

    async fn init_schema(&self, pool: &PgPool) -> Result<(), SinkError> {
        let events = self.config.events_table();
        let logs = self.config.logs_table();
        let table = &self.config.table_name;

        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.config.schema_name),
            format!(
                "CREATE TABLE IF NOT EXISTS {events} (
                    tx_hash      TEXT        PRIMARY KEY,
                    block_number BIGINT      NOT NULL,
                    tx_index     BIGINT      NOT NULL,
                    status       TEXT        NOT NULL,
                    status_code  SMALLINT    NOT NULL,
                    gas_used     BIGINT      NOT NULL,
                    log_count    INTEGER     NOT NULL,
                    inserted_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {logs} (
                    tx_hash      TEXT    NOT NULL REFERENCES {events}(tx_hash) ON DELETE CASCADE,
                    log_index    BIGINT  NOT NULL,
                    tx_index     BIGINT  NOT NULL,
                    event_type   TEXT    NOT NULL,
                    contract     TEXT    NOT NULL,
                    from_address TEXT    NOT NULL,
                    to_address   TEXT    NOT NULL,
                    value        TEXT    NOT NULL,
                    topics       JSONB   NOT NULL,
                    data         TEXT    NOT NULL,
                    PRIMARY KEY (tx_hash, log_index)
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_block ON {events}(block_number DESC)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_logs_from ON {logs}(from_address)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_logs_to ON {logs}(to_address)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_logs_type ON {logs}(event_type)"),
        ];

        for stmt in &statements {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| SinkError::init(SINK_NAME, format!("schema: {e}")))?;
        }
        debug!(sink = SINK_NAME, table = %events, "schema initialized");
        Ok(())
    }

    /// Stored events of one block, ordered by transaction index.
    pub async fn events_by_block(&self, block_number: u64) -> Result<Vec<EventRecord>, SinkError> {
        let pool = self.pool()?;
        let rows = sqlx::query(&format!(
            "SELECT tx_hash, block_number, tx_index, status, status_code, gas_used, log_count
             FROM {} WHERE block_number = $1 ORDER BY tx_index",
            self.config.events_table()
        ))
        .bind(block_number as i64)
        .fetch_all(pool)
        .await
        .map_err(query_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let tx_hash: String = row.try_get("tx_hash").map_err(query_error)?;
            let logs = self.logs_for(pool, &tx_hash).await?;
            records.push(EventRecord {
                block_number: row.try_get::<i64, _>("block_number").map_err(query_error)? as u64,
                tx_index: row.try_get::<i64, _>("tx_index").map_err(query_error)? as u64,
                status: row.try_get("status").map_err(query_error)?,
                status_code: row.try_get::<i16, _>("status_code").map_err(query_error)? as u64,
                gas_used: row.try_get::<i64, _>("gas_used").map_err(query_error)? as u64,
                log_count: row.try_get::<i32, _>("log_count").map_err(query_error)? as usize,
                tx_hash,
                logs,
            });
        }
        Ok(records)
    }

    async fn logs_for(&self, pool: &PgPool, tx_hash: &str) -> Result<Vec<LogRecord>, SinkError> {
        let rows = sqlx::query(&format!(
            "SELECT log_index, tx_index, event_type, contract, from_address, to_address,
                    value, topics, data
             FROM {} WHERE tx_hash = $1 ORDER BY log_index",
            self.config.logs_table()
        ))
        .bind(tx_hash)
        .fetch_all(pool)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| -> Result<LogRecord, SinkError> {
                let event_type: String = row.try_get("event_type").map_err(query_error)?;
                let topics: serde_json::Value = row.try_get("topics").map_err(query_error)?;
                Ok(LogRecord {
                    event_type: serde_json::from_value(serde_json::Value::String(event_type))?,
                    address: row.try_get("contract").map_err(query_error)?,
                    topics: serde_json::from_value(topics)?,
                    data: row.try_get("data").map_err(query_error)?,
                    log_index: row.try_get::<i64, _>("log_index").map_err(query_error)? as u64,
                    tx_index: row.try_get::<i64, _>("tx_index").map_err(query_error)? as u64,
                    from: row.try_get("from_address").map_err(query_error)?,
                    to: row.try_get("to_address").map_err(query_error)?,
                    value: row.try_get("value").map_err(query_error)?,
                })
            })
            .collect()
    }
}

fn query_error(e: sqlx::Error) -> SinkError {
    SinkError::Other(format!("{SINK_NAME} query: {e}"))
}

fn flush_error(records: usize, e: impl std::fmt::Display) -> SinkError {
    SinkError::Flush {
        sink: SINK_NAME.into(),
        records,
        reason: e.to_string(),
    }
}

#[async_trait]
impl BatchWriter for SqlWriter {
    type Record = EventRecord;

    async fn connect(&mut self) -> Result<(), SinkError> {
        self.config.validate().map_err(|e| SinkError::init(SINK_NAME, e))?;

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect(&self.config.connection_string)
            .await
            .map_err(|e| SinkError::init(SINK_NAME, format!("postgres connect: {e}")))?;

        if self.config.create_tables {
            self.init_schema(&pool).await?;
        }
        info!(sink = SINK_NAME, table = %self.config.events_table(), "postgres connected");
        self.pool = Some(pool);
        Ok(())
    }

    fn encode(&self, event: &Event) -> Result<EventRecord, SinkError> {
        Ok(EventRecord::from_event(event))
    }

    async fn write_batch(&self, records: &[EventRecord]) -> Result<(), SinkError> {
        let pool = self.pool()?;
        let events = self.config.events_table();
        let logs = self.config.logs_table();

        let insert_event = format!(
            "INSERT INTO {events}
                (tx_hash, block_number, tx_index, status, status_code, gas_used, log_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tx_hash) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                tx_index     = EXCLUDED.tx_index,
                status       = EXCLUDED.status,
                status_code  = EXCLUDED.status_code,
                gas_used     = EXCLUDED.gas_used,
                log_count    = EXCLUDED.log_count,
                inserted_at  = NOW()"
        );
        let insert_log = format!(
            "INSERT INTO {logs}
                (tx_hash, log_index, tx_index, event_type, contract, from_address, to_address,
                 value, topics, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (tx_hash, log_index) DO UPDATE SET
                event_type   = EXCLUDED.event_type,
                from_address = EXCLUDED.from_address,
                to_address   = EXCLUDED.to_address,
                value        = EXCLUDED.value,
                topics       = EXCLUDED.topics,
                data         = EXCLUDED.data"
        );

        let n = records.len();
        let mut tx = pool.begin().await.map_err(|e| flush_error(n, e))?;

        for record in records {
            sqlx::query(&insert_event)
                .bind(&record.tx_hash)
                .bind(record.block_number as i64)
                .bind(record.tx_index as i64)
                .bind(&record.status)
                .bind(record.status_code as i16)
                .bind(record.gas_used as i64)
                .bind(record.log_count as i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| flush_error(n, e))?;

            for log in &record.logs {
                sqlx::query(&insert_log)
                    .bind(&record.tx_hash)
                    .bind(log.log_index as i64)
                    .bind(log.tx_index as i64)
                    .bind(log.event_type.as_str())
                    .bind(&log.address)
                    .bind(&log.from)
                    .bind(&log.to)
                    .bind(&log.value)
                    .bind(serde_json::json!(log.topics))
                    .bind(&log.data)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| flush_error(n, e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| flush_error(n, format!("commit batch: {e}")))?;
        debug!(sink = SINK_NAME, records = n, "batch committed");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SinkError> {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        Ok(())
    }
}
