//! Optional JSONL index: one line per written event.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where one event landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Data file name.
    pub file: String,
    /// Byte offset of the record in the uncompressed stream.
    pub offset: u64,
    pub block_number: u64,
    pub tx_hash: String,
}

pub struct IndexWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl IndexWriter {
    /// Open `<dir>/<prefix>_index.jsonl` for appending.
    pub fn open(dir: &Path, prefix: &str) -> io::Result<Self> {
        let path = dir.join(format!("{prefix}_index.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &IndexEntry) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, entry)?;
        self.out.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Read every entry of an index file.
pub fn read_index(path: &Path) -> io::Result<Vec<IndexEntry>> {
    std::fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(io::Error::from))
        .collect()
}
