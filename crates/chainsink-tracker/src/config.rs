//! Tracker configuration loaded from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `RPC_URL` (or `WEBHOOK_URL`) | required |
//! | `NETWORK` | `sepolia` |
//! | `CONTRACT_ADDRESS` | USDC on `NETWORK` |
//! | `SINKS` | `console` |
//! | `BLOCK_INTERVAL_SECS` | `12` |
//! | `SINK_BATCH_SIZE`, `SINK_FLUSH_INTERVAL_MS`, `SINK_FLUSH_TIMEOUT_MS` | `100`, `5000`, `30000` |
//! | `FS_*`, `SQL_*`, `ELASTICSEARCH_*`, `KAFKA_*` | per sink |
//!
//! Loading goes through a lookup function so tests can inject a map instead
//! of touching the process environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{address, Address};

use chainsink_core::FlushPolicy;
use chainsink_sinks::{FileFormat, FileSinkConfig, RotationStrategy};
#[cfg(feature = "elasticsearch")]
use chainsink_sinks::ElasticsearchConfig;
#[cfg(feature = "kafka")]
use chainsink_sinks::KafkaConfig;
#[cfg(feature = "postgres")]
use chainsink_sinks::SqlConfig;

use crate::error::ConfigError;

/// USDC contract per supported network.
const USDC_CONTRACTS: [(&str, Address); 7] = [
    ("mainnet", address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
    ("sepolia", address!("1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")),
    ("arbitrum", address!("af88d065e77c8cC2239327C5EDb3A432268e5831")),
    ("avalanche", address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E")),
    ("linea", address!("176211869cA2b568f2A7D4EE941E073a821EE1ff")),
    ("polygon", address!("3c499c542cef5e3811e1192ce70d8cc03d5c3359")),
    ("optimism", address!("0b2c639c533813f4aa9d7837caf62653d097ff85")),
];

const DEFAULT_NETWORK: &str = "sepolia";
const DEFAULT_SINK: &str = "console";

/// USDC contract address on `network` (`ethereum` is an alias of `mainnet`).
pub fn usdc_address(network: &str) -> Option<Address> {
    let network = match network.trim().to_ascii_lowercase().as_str() {
        "ethereum" => "mainnet".to_string(),
        other => other.to_string(),
    };
    USDC_CONTRACTS
        .iter()
        .find(|(name, _)| *name == network)
        .map(|(_, addr)| *addr)
}

pub fn supported_networks() -> Vec<&'static str> {
    USDC_CONTRACTS.iter().map(|(name, _)| *name).collect()
}

// ─── TrackerConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// JSON-RPC endpoint of the node.
    pub rpc_url: String,
    pub network: String,
    /// Contract whose logs are tracked.
    pub contract_address: Address,
    /// Sink names in registration order.
    pub sinks: Vec<String>,
    pub block_interval: Duration,
    pub rpc_timeout: Duration,
    /// Batching applied to every network-backed sink.
    pub flush: FlushPolicy,
    pub file: FileSinkConfig,
    /// Present only when `SQL_CONNECTION_STRING` is set.
    #[cfg(feature = "postgres")]
    pub sql: Option<SqlConfig>,
    #[cfg(feature = "elasticsearch")]
    pub elasticsearch: ElasticsearchConfig,
    #[cfg(feature = "kafka")]
    pub kafka: KafkaConfig,
}

impl TrackerConfig {
    /// Defaults for `network` with the console sink only.
    pub fn new(rpc_url: impl Into<String>, network: &str) -> Result<Self, ConfigError> {
        let network = network.trim().to_ascii_lowercase();
        let contract_address =
            usdc_address(&network).ok_or_else(|| ConfigError::UnsupportedNetwork(network.clone()))?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            contract_address,
            sinks: vec![DEFAULT_SINK.to_string()],
            block_interval: Duration::from_secs(12),
            rpc_timeout: Duration::from_secs(30),
            flush: FlushPolicy::default(),
            file: FileSinkConfig::default(),
            #[cfg(feature = "postgres")]
            sql: None,
            #[cfg(feature = "elasticsearch")]
            elasticsearch: ElasticsearchConfig::default().with_network(network.clone()),
            #[cfg(feature = "kafka")]
            kafka: KafkaConfig::default(),
            network,
        })
    }

    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sinks = normalize_sinks(sinks.into_iter().map(Into::into));
        self
    }

    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    /// Switch network, which also selects that network's USDC contract.
    pub fn with_network(mut self, network: &str) -> Result<Self, ConfigError> {
        let network = network.trim().to_ascii_lowercase();
        self.contract_address =
            usdc_address(&network).ok_or_else(|| ConfigError::UnsupportedNetwork(network.clone()))?;
        #[cfg(feature = "elasticsearch")]
        {
            self.elasticsearch.network = network.clone();
        }
        self.network = network;
        Ok(self)
    }

    pub fn with_contract(mut self, address: Address) -> Self {
        self.contract_address = address;
        self
    }

    pub fn with_file_sink(mut self, file: FileSinkConfig) -> Self {
        self.file = file;
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let rpc_url = vars
            .get("RPC_URL")
            .or_else(|| vars.get("WEBHOOK_URL"))
            .ok_or_else(|| ConfigError::Missing("RPC_URL".into()))?;
        let network = vars.get("NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.into());
        let mut config = Self::new(rpc_url, &network)?;

        if let Some(raw) = vars.get("CONTRACT_ADDRESS") {
            config.contract_address = Address::from_str(&raw)
                .map_err(|e| ConfigError::invalid("CONTRACT_ADDRESS", &raw, e))?;
        }
        if let Some(raw) = vars.get("SINKS") {
            config.sinks = normalize_sinks(raw.split(',').map(str::to_string));
        }
        config.block_interval = Duration::from_secs(vars.parse("BLOCK_INTERVAL_SECS", 12u64)?);
        config.rpc_timeout = Duration::from_secs(vars.parse("RPC_TIMEOUT_SECS", 30u64)?);

        config.flush = FlushPolicy::default()
            .with_batch_size(vars.parse("SINK_BATCH_SIZE", 100usize)?)
            .with_flush_interval(Duration::from_millis(vars.parse("SINK_FLUSH_INTERVAL_MS", 5_000u64)?))
            .with_flush_timeout(Duration::from_millis(vars.parse("SINK_FLUSH_TIMEOUT_MS", 30_000u64)?));
        if let Some(max_pending) = vars.parse_opt::<usize>("SINK_MAX_PENDING")? {
            config.flush = config.flush.with_max_pending(max_pending);
        }
        config
            .flush
            .validate()
            .map_err(|e| ConfigError::invalid("SINK_*", &format!("{:?}", config.flush), e))?;

        config.file = file_config(&vars)?;

        #[cfg(feature = "postgres")]
        {
            config.sql = vars.get("SQL_CONNECTION_STRING").map(|conn| {
                let mut sql = SqlConfig::new(conn).with_flush_policy(config.flush.clone());
                if let Some(schema) = vars.get("SQL_SCHEMA") {
                    sql.schema_name = schema;
                }
                if let Some(table) = vars.get("SQL_TABLE") {
                    sql.table_name = table;
                }
                sql
            });
            if let Some(sql) = config.sql.as_mut() {
                sql.create_tables = vars.flag("SQL_CREATE_TABLES", true)?;
                sql.max_connections = vars.parse("SQL_MAX_CONNECTIONS", sql.max_connections)?;
            }
        }

        #[cfg(feature = "elasticsearch")]
        {
            let mut es = ElasticsearchConfig::default()
                .with_network(config.network.clone())
                .with_flush_policy(config.flush.clone());
            if let Some(urls) = vars.get("ELASTICSEARCH_URLS") {
                es.urls = split_list(&urls);
            }
            if let (Some(user), Some(pass)) =
                (vars.get("ELASTICSEARCH_USERNAME"), vars.get("ELASTICSEARCH_PASSWORD"))
            {
                es = es.with_credentials(user, pass);
            }
            if let Some(prefix) = vars.get("ELASTICSEARCH_INDEX_PREFIX") {
                es = es.with_index_prefix(prefix);
            }
            es.use_timestamp_suffix = vars.flag("ELASTICSEARCH_TIMESTAMP_SUFFIX", true)?;
            es.create_template = vars.flag("ELASTICSEARCH_CREATE_TEMPLATE", true)?;
            config.elasticsearch = es;
        }

        #[cfg(feature = "kafka")]
        {
            let mut kafka = KafkaConfig::default().with_flush_policy(config.flush.clone());
            if let Some(brokers) = vars.get("KAFKA_BROKERS") {
                kafka.brokers = split_list(&brokers);
            }
            if let Some(topic) = vars.get("KAFKA_TOPIC") {
                kafka.topic = topic;
            }
            kafka.logs_topic = vars.get("KAFKA_LOGS_TOPIC");
            if let Some(codec) = vars.get("KAFKA_COMPRESSION") {
                kafka = kafka.with_compression(codec.to_ascii_lowercase());
            }
            if let Some(acks) = vars.get("KAFKA_ACKS") {
                kafka = kafka.with_required_acks(acks.to_ascii_lowercase());
            }
            config.kafka = kafka;
        }

        Ok(config)
    }
}

fn file_config<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<FileSinkConfig, ConfigError> {
    let mut file = FileSinkConfig::default();
    if let Some(dir) = vars.get("FS_OUTPUT_DIR") {
        file.output_dir = dir.into();
    }
    if let Some(prefix) = vars.get("FS_FILE_PREFIX") {
        file.file_prefix = prefix;
    }
    file.format = vars.parse::<FileFormat>("FS_FORMAT", file.format)?;
    file.rotation = vars.parse::<RotationStrategy>("FS_ROTATION", file.rotation)?;
    file.max_file_size = vars.parse("FS_MAX_FILE_SIZE", file.max_file_size)?;
    file.max_events = vars.parse("FS_MAX_EVENTS", file.max_events)?;
    file.rotation_interval_secs = vars.parse("FS_ROTATION_INTERVAL_SECS", file.rotation_interval_secs)?;
    file.compress = vars.flag("FS_COMPRESS", false)?;
    file.create_index = vars.flag("FS_CREATE_INDEX", false)?;
    Ok(file)
}

/// Lowercase, trim, drop empties and duplicates; falls back to `console`.
fn normalize_sinks(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut sinks: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim().to_ascii_lowercase();
        if !name.is_empty() && !sinks.contains(&name) {
            sinks.push(name);
        }
    }
    if sinks.is_empty() {
        sinks.push(DEFAULT_SINK.to_string());
    }
    sinks
}

#[cfg(any(feature = "elasticsearch", feature = "kafka"))]
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ─── Variable access ──────────────────────────────────────────────────────────

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Trimmed, non-empty value.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|raw| raw.parse::<T>().map_err(|e| ConfigError::invalid(key, &raw, e)))
            .transpose()
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid(key, &raw, "expected true or false")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<TrackerConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TrackerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn rpc_url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn webhook_url_is_accepted() {
        let config = load(&[("WEBHOOK_URL", "http://node:8545")]).unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
    }

    #[test]
    fn defaults_to_sepolia_and_console() {
        let config = load(&[("RPC_URL", "http://node:8545")]).unwrap();
        assert_eq!(config.network, "sepolia");
        assert_eq!(config.contract_address, usdc_address("sepolia").unwrap());
        assert_eq!(config.sinks, vec!["console"]);
        assert_eq!(config.block_interval, Duration::from_secs(12));
        assert_eq!(config.flush, FlushPolicy::default());
    }

    #[test]
    fn network_selects_usdc_contract() {
        let config = load(&[("RPC_URL", "x"), ("NETWORK", "Ethereum")]).unwrap();
        assert_eq!(
            config.contract_address.to_checksum(None),
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
        );
        assert!(matches!(
            load(&[("RPC_URL", "x"), ("NETWORK", "goerli")]),
            Err(ConfigError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn with_network_switches_contract() {
        let config = TrackerConfig::new("x", "sepolia").unwrap().with_network("Optimism").unwrap();
        assert_eq!(config.network, "optimism");
        assert_eq!(config.contract_address, usdc_address("optimism").unwrap());
        assert!(TrackerConfig::new("x", "sepolia").unwrap().with_network("base").is_err());
    }

    #[test]
    fn sinks_are_normalized() {
        let config = load(&[("RPC_URL", "x"), ("SINKS", " Console, filesystem,,console ,MongoDB")]).unwrap();
        assert_eq!(config.sinks, vec!["console", "filesystem", "mongodb"]);

        let config = load(&[("RPC_URL", "x"), ("SINKS", " , ")]).unwrap();
        assert_eq!(config.sinks, vec!["console"]);
    }

    #[test]
    fn file_sink_settings() {
        let config = load(&[
            ("RPC_URL", "x"),
            ("FS_OUTPUT_DIR", "/tmp/usdc"),
            ("FS_FORMAT", "csv"),
            ("FS_ROTATION", "events"),
            ("FS_MAX_EVENTS", "50"),
            ("FS_COMPRESS", "true"),
        ])
        .unwrap();
        assert_eq!(config.file.output_dir, std::path::PathBuf::from("/tmp/usdc"));
        assert_eq!(config.file.format, FileFormat::Csv);
        assert_eq!(config.file.rotation, RotationStrategy::Events);
        assert_eq!(config.file.max_events, 50);
        assert!(config.file.compress);
        assert!(!config.file.create_index);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = load(&[("RPC_URL", "x"), ("BLOCK_INTERVAL_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("BLOCK_INTERVAL_SECS"));
        assert!(load(&[("RPC_URL", "x"), ("FS_FORMAT", "xml")]).is_err());
        assert!(load(&[("RPC_URL", "x"), ("FS_COMPRESS", "maybe")]).is_err());
        assert!(load(&[("RPC_URL", "x"), ("SINK_BATCH_SIZE", "0")]).is_err());
    }

    #[test]
    fn batching_settings_apply() {
        let config = load(&[
            ("RPC_URL", "x"),
            ("SINK_BATCH_SIZE", "25"),
            ("SINK_FLUSH_INTERVAL_MS", "1000"),
        ])
        .unwrap();
        assert_eq!(config.flush.batch_size, 25);
        assert_eq!(config.flush.flush_interval, Duration::from_secs(1));
        assert_eq!(config.flush.max_pending, 2_500);
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn sql_config_only_with_connection_string() {
        assert!(load(&[("RPC_URL", "x")]).unwrap().sql.is_none());
        let config = load(&[
            ("RPC_URL", "x"),
            ("SQL_CONNECTION_STRING", "postgres://localhost/usdc"),
            ("SQL_TABLE", "transfers"),
        ])
        .unwrap();
        let sql = config.sql.unwrap();
        assert_eq!(sql.table_name, "transfers");
        assert_eq!(sql.schema_name, "public");
        assert!(sql.create_tables);
    }

    #[cfg(feature = "elasticsearch")]
    #[test]
    fn elasticsearch_settings() {
        let config = load(&[
            ("RPC_URL", "x"),
            ("NETWORK", "polygon"),
            ("ELASTICSEARCH_URLS", "http://a:9200, http://b:9200"),
        ])
        .unwrap();
        assert_eq!(config.elasticsearch.urls, vec!["http://a:9200", "http://b:9200"]);
        assert_eq!(config.elasticsearch.network, "polygon");
    }
}
