//! On-disk encodings for the file sink.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use chainsink_core::record::{EventRecord, LogRecord};
use chainsink_core::types::Event;
use chainsink_core::SinkError;

/// CSV columns, one row per log.
pub const CSV_COLUMNS: [&str; 13] = [
    "block_number",
    "tx_hash",
    "tx_index",
    "status",
    "gas_used",
    "log_index",
    "event_type",
    "contract",
    "from",
    "to",
    "value",
    "topics",
    "data",
];

/// Output format of a file sink; fixed for the sink's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Pretty-printed JSON array.
    Json,
    /// One JSON object per line.
    Jsonl,
    /// One row per log.
    Csv,
    /// Human-readable text.
    Text,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Text => "txt",
        }
    }

    /// Bytes written when a file is opened.
    pub fn header(self) -> Vec<u8> {
        match self {
            Self::Json => b"[\n".to_vec(),
            Self::Csv => {
                let mut line = CSV_COLUMNS.join(",");
                line.push('\n');
                line.into_bytes()
            }
            Self::Jsonl | Self::Text => Vec::new(),
        }
    }

    /// Bytes written when a file is finished.
    pub fn footer(self) -> &'static [u8] {
        match self {
            Self::Json => b"\n]\n",
            _ => b"",
        }
    }

    /// Bytes written between two records of the same file.
    pub fn separator(self) -> &'static [u8] {
        match self {
            Self::Json => b",\n",
            _ => b"",
        }
    }

    /// Encode one event. The result never includes the separator.
    pub fn encode(self, event: &Event) -> Result<Vec<u8>, SinkError> {
        let record = EventRecord::from_event(event);
        match self {
            Self::Json => Ok(serde_json::to_vec_pretty(&record)?),
            Self::Jsonl => {
                let mut line = serde_json::to_vec(&record)?;
                line.push(b'\n');
                Ok(line)
            }
            Self::Csv => Ok(csv_rows(&record).into_bytes()),
            Self::Text => Ok(text_block(&record).into_bytes()),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Text => "text",
        })
    }
}

impl FromStr for FileFormat {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "csv" => Ok(Self::Csv),
            "text" | "txt" => Ok(Self::Text),
            other => Err(SinkError::config(format!("unknown file format '{other}'"))),
        }
    }
}

// ─── CSV ──────────────────────────────────────────────────────────────────────

fn csv_rows(record: &EventRecord) -> String {
    let prefix = [
        record.block_number.to_string(),
        record.tx_hash.clone(),
        record.tx_index.to_string(),
        record.status.clone(),
        record.gas_used.to_string(),
    ];

    // A transaction without matching logs still gets one row.
    if record.logs.is_empty() {
        let mut fields: Vec<String> = prefix.to_vec();
        fields.resize(CSV_COLUMNS.len(), String::new());
        return csv_line(&fields);
    }

    record
        .logs
        .iter()
        .map(|log| {
            let mut fields: Vec<String> = prefix.to_vec();
            fields.extend(log_fields(log));
            csv_line(&fields)
        })
        .collect()
}

fn log_fields(log: &LogRecord) -> [String; 8] {
    [
        log.log_index.to_string(),
        log.event_type.to_string(),
        log.address.clone(),
        log.from.clone(),
        log.to.clone(),
        log.value.clone(),
        log.topics.join(";"),
        log.data.clone(),
    ]
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn csv_escape(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ─── Text ─────────────────────────────────────────────────────────────────────

fn text_block(record: &EventRecord) -> String {
    let mut out = format!(
        "Block #{} | tx {} (index {}) | {} | gas {}\n",
        record.block_number, record.tx_hash, record.tx_index, record.status, record.gas_used
    );
    for log in &record.logs {
        match log.event_type {
            chainsink_core::EventKind::Unknown => out.push_str(&format!(
                "  [{}] Unknown topics={}\n",
                log.log_index,
                log.topics.join(",")
            )),
            kind => out.push_str(&format!(
                "  [{}] {} {} -> {} value={}\n",
                log.log_index, kind, log.from, log.to, log.value
            )),
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_core::alloy_primitives::{Address, Bytes, B256, U256};
    use chainsink_core::types::{Log, TxStatus};
    use chainsink_core::TRANSFER_SIGNATURE;

    fn pad(addr: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_slice());
        B256::from(word)
    }

    fn transfer(block: u64, logs: usize) -> Event {
        Event {
            block_number: block,
            tx_hash: B256::repeat_byte(0x0f),
            tx_index: 2,
            status: TxStatus::Success,
            gas_used: 45_000,
            logs: (0..logs as u64)
                .map(|i| Log {
                    address: Address::repeat_byte(0x99),
                    topics: vec![
                        TRANSFER_SIGNATURE,
                        pad(Address::repeat_byte(1)),
                        pad(Address::repeat_byte(2)),
                    ],
                    data: Bytes::from(U256::from(10u64).to_be_bytes::<32>().to_vec()),
                    log_index: i,
                    tx_index: 2,
                })
                .collect(),
        }
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("JSONL".parse::<FileFormat>().unwrap(), FileFormat::Jsonl);
        assert_eq!("txt".parse::<FileFormat>().unwrap(), FileFormat::Text);
        assert!("parquet".parse::<FileFormat>().is_err());
        assert_eq!(FileFormat::Text.extension(), "txt");
    }

    #[test]
    fn jsonl_is_one_line_per_event() {
        let bytes = FileFormat::Jsonl.encode(&transfer(1, 2)).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["log_count"], 2);
    }

    #[test]
    fn json_array_parses_back() {
        let format = FileFormat::Json;
        let mut file = format.header();
        file.extend(format.encode(&transfer(1, 1)).unwrap());
        file.extend_from_slice(format.separator());
        file.extend(format.encode(&transfer(2, 1)).unwrap());
        file.extend_from_slice(format.footer());

        let value: serde_json::Value = serde_json::from_slice(&file).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[1]["block_number"], 2);
    }

    #[test]
    fn csv_writes_one_row_per_log() {
        let text = String::from_utf8(FileFormat::Csv.encode(&transfer(5, 3)).unwrap()).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("5,0x0f0f"));
        assert!(rows[0].contains(",Transfer,"));
        assert_eq!(rows[0].split(',').count(), CSV_COLUMNS.len());
    }

    #[test]
    fn csv_keeps_transactions_without_logs() {
        let text = String::from_utf8(FileFormat::Csv.encode(&transfer(5, 0)).unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.trim_end().split(',').count(), CSV_COLUMNS.len());
    }

    #[test]
    fn csv_escapes_special_characters() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
