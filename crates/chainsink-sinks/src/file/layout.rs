//! Directory layout and file naming of the file sink.
//!
//! ```text
//! <output_dir>/
//!   current/                 file being written
//!   archive/<YYYY>/<MM>/     finished files, by start time
//!   metadata/                sink metadata JSON
//!   index/                   optional JSONL index
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::format::FileFormat;

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_dir(&self) -> PathBuf {
        self.root.join("current")
    }

    pub fn archive_root(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// `archive/<YYYY>/<MM>` for a file opened at `started_at`.
    pub fn archive_dir(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.archive_root()
            .join(started_at.format("%Y").to_string())
            .join(started_at.format("%m").to_string())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// Create every directory the sink writes to.
    pub fn create(&self, with_index: bool) -> io::Result<()> {
        std::fs::create_dir_all(self.current_dir())?;
        std::fs::create_dir_all(self.archive_root())?;
        std::fs::create_dir_all(self.metadata_dir())?;
        if with_index {
            std::fs::create_dir_all(self.index_dir())?;
        }
        Ok(())
    }

    /// Move a finished file from `current/` into its archive month. Never
    /// replaces an archived file of the same name.
    pub fn archive(&self, file_name: &str, started_at: DateTime<Utc>) -> io::Result<PathBuf> {
        let dir = self.archive_dir(started_at);
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(file_name);
        if target.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is already archived", target.display()),
            ));
        }
        std::fs::rename(self.current_dir().join(file_name), &target)?;
        Ok(target)
    }
}

/// `<prefix>_<YYYYMMDD>_<HHMMSS>_<seq:06>.<ext>[.gz]`
pub fn file_name(
    prefix: &str,
    started_at: DateTime<Utc>,
    sequence: u64,
    format: FileFormat,
    compress: bool,
) -> String {
    let mut name = format!(
        "{}_{}_{:06}.{}",
        prefix,
        started_at.format("%Y%m%d_%H%M%S"),
        sequence,
        format.extension()
    );
    if compress {
        name.push_str(".gz");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_shape() {
        let t = Utc.with_ymd_and_hms(2024, 7, 4, 9, 5, 3).unwrap();
        assert_eq!(
            file_name("usdc", t, 12, FileFormat::Jsonl, false),
            "usdc_20240704_090503_000012.jsonl"
        );
        assert_eq!(
            file_name("usdc", t, 1, FileFormat::Csv, true),
            "usdc_20240704_090503_000001.csv.gz"
        );
    }

    #[test]
    fn archive_dir_is_year_and_month() {
        let layout = Layout::new("/data/out");
        let t = Utc.with_ymd_and_hms(2024, 7, 4, 9, 5, 3).unwrap();
        assert_eq!(layout.archive_dir(t), PathBuf::from("/data/out/archive/2024/07"));
    }

    #[test]
    fn archive_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create(false).unwrap();
        std::fs::write(layout.current_dir().join("a.txt"), b"x").unwrap();

        let t = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        let moved = layout.archive("a.txt", t).unwrap();

        assert!(moved.ends_with("archive/2023/12/a.txt"));
        assert!(moved.exists());
        assert!(!layout.current_dir().join("a.txt").exists());
    }

    #[test]
    fn archive_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create(false).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        std::fs::write(layout.current_dir().join("a.txt"), b"first").unwrap();
        layout.archive("a.txt", t).unwrap();
        std::fs::write(layout.current_dir().join("a.txt"), b"second").unwrap();

        let err = layout.archive("a.txt", t).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        let archived = layout.archive_dir(t).join("a.txt");
        assert_eq!(std::fs::read(archived).unwrap(), b"first");
        assert!(layout.current_dir().join("a.txt").exists());
    }
}
