//! Raw feed sources.
//!
//! A source is a named, finite, restartable stream of newline-delimited
//! records in one wire encoding. Acquiring the bytes is someone else's job;
//! a source only has to open for reading.

use quotelab_core::decode::WireEncoding;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::SourceSpec;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source '{name}' cannot be opened at {path}: {reason}")]
    Open {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("source '{name}' failed at line {line}: {reason}")]
    Read {
        name: String,
        line: u64,
        reason: String,
    },
}

impl SourceError {
    pub fn source_name(&self) -> &str {
        match self {
            SourceError::Open { name, .. } | SourceError::Read { name, .. } => name,
        }
    }
}

pub type SourceReader = Box<dyn BufRead + Send>;

pub trait FeedSource: Send + Sync {
    fn name(&self) -> &str;

    fn encoding(&self) -> WireEncoding;

    /// Open a fresh reader positioned at the first record.
    fn open(&self) -> Result<SourceReader, SourceError>;
}

/// A dump file on local disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    encoding: WireEncoding,
}

impl FileSource {
    pub fn new(name: &str, path: impl Into<PathBuf>, encoding: WireEncoding) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            encoding,
        }
    }

    /// Resolve a configured template for one date.
    pub fn from_spec(spec: &SourceSpec, date: chrono::NaiveDate) -> Self {
        Self::new(&spec.name, spec.expand(date), spec.encoding)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FeedSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    fn open(&self) -> Result<SourceReader, SourceError> {
        let file = File::open(&self.path).map_err(|e| SourceError::Open {
            name: self.name.clone(),
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        // 1 MiB read buffer.
        Ok(Box::new(BufReader::with_capacity(1 << 20, file)))
    }
}

/// An in-memory source, for tests and replay.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    encoding: WireEncoding,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: &str, encoding: WireEncoding, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            encoding,
            data: data.into(),
        }
    }

    pub fn from_lines(name: &str, encoding: WireEncoding, lines: &[&str]) -> Self {
        let mut data = lines.join("\n");
        data.push('\n');
        Self::new(name, encoding, data)
    }
}

impl FeedSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    fn open(&self) -> Result<SourceReader, SourceError> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new("otc", dir.path().join("OTCQuote.20251119"), WireEncoding::Delimited);
        let err = source.open().err().unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
        assert_eq!(err.source_name(), "otc");
    }

    #[test]
    fn file_source_reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TSEQuote.20251119");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "Trade,2355,90000000000,1,1,1,1").unwrap();
        writeln!(f, "Trade,2355,90000000001,1,1,1,2").unwrap();

        let source = FileSource::new("tse", &path, WireEncoding::Delimited);
        let lines: Vec<String> = source.open().unwrap().lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn memory_source_is_restartable() {
        let source = MemorySource::from_lines("m", WireEncoding::Delimited, &["a", "b"]);
        assert_eq!(source.open().unwrap().lines().count(), 2);
        assert_eq!(source.open().unwrap().lines().count(), 2);
    }

    #[test]
    fn template_expands_to_dated_path() {
        let spec = SourceSpec::new("otc", "raw/OTCQuote.{date}", WireEncoding::Delimited);
        let date = chrono::NaiveDate::from_ymd_opt(2025, 11, 19).unwrap();
        let source = FileSource::from_spec(&spec, date);
        assert_eq!(source.path(), Path::new("raw/OTCQuote.20251119"));
        assert_eq!(source.name(), "otc");
    }
}
