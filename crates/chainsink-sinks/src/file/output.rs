//! Buffered, optionally gzip-compressed file writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Write half of one data file.
pub enum Output {
    Plain(BufWriter<File>),
    Gzip(BufWriter<GzEncoder<File>>),
}

impl Output {
    pub fn create(path: &Path, compress: bool, buffer_size: usize) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(if compress {
            Self::Gzip(BufWriter::with_capacity(
                buffer_size,
                GzEncoder::new(file, Compression::default()),
            ))
        } else {
            Self::Plain(BufWriter::with_capacity(buffer_size, file))
        })
    }

    /// Flush buffers and close the gzip stream.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Self::Plain(w) => {
                let file = w.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()
            }
            Self::Gzip(w) => {
                let encoder = w.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?.sync_all()
            }
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn gzip_output_decompresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl.gz");
        let mut out = Output::create(&path, true, 1024).unwrap();
        out.write_all(b"{\"a\":1}\n{\"a\":2}\n").unwrap();
        out.finish().unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn plain_output_is_flushed_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut out = Output::create(&path, false, 64 * 1024).unwrap();
        out.write_all(b"hello").unwrap();
        out.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
