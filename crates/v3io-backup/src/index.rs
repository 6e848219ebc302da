//! Index files mapping each packed entry to its location.
//!
//! An index file holds one JSON encoded [`IndexEntry`] per line. Index files
//! are sequence numbered and rolled over once the next record would push the
//! file past the configured size limit.
//!

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{BackupError, repository::SessionLayout};

/// Where the content of one entry lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Source path within the container.
    pub path: String,

    /// Sequence number of the pack file.
    pub pack: u64,

    /// Byte offset within the pack file.
    pub offset: u64,

    /// Number of content bytes.
    pub length: u64,

    /// Last modification time of the source.
    pub modified: DateTime<Utc>,

    /// The entry alone exceeds the pack file size limit.
    #[serde(default)]
    pub oversized: bool,
}

/// Buffers index records and flushes them into size-bounded index files.
#[derive(Debug)]
pub(crate) struct IndexWriter {
    limit: u64,
    buffer: Vec<u8>,
    next_sequence: u64,
    written: Vec<PathBuf>,
}

impl IndexWriter {
    pub(crate) fn new(limit: u64) -> Self {
        Self {
            limit,
            buffer: Vec::new(),
            next_sequence: 0,
            written: Vec::new(),
        }
    }

    /// Appends a record, first flushing the buffer if the record would not fit.
    ///
    /// A record larger than the limit is written alone into its own file.
    pub(crate) fn push(
        &mut self,
        entry: &IndexEntry,
        layout: &SessionLayout,
    ) -> Result<Option<PathBuf>, BackupError> {
        let mut line =
            serde_json::to_vec(entry).map_err(|source| BackupError::SerializeIndex {
                path: entry.path.clone(),
                source,
            })?;
        line.push(b'\n');

        let line_length = byte_length(&line);
        let mut flushed = None;
        if !self.buffer.is_empty() && byte_length(&self.buffer) + line_length > self.limit {
            flushed = self.flush(layout)?;
        }

        self.buffer.extend_from_slice(&line);

        Ok(flushed)
    }

    /// Writes any buffered records into a new index file.
    pub(crate) fn flush(&mut self, layout: &SessionLayout) -> Result<Option<PathBuf>, BackupError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let path = layout.index_path(self.next_sequence);

        let mut file =
            File::create(&path).map_err(|e| BackupError::pack_write("create index file", &path, e))?;
        file.write_all(&self.buffer)
            .map_err(|e| BackupError::pack_write("write index file", &path, e))?;
        file.sync_all()
            .map_err(|e| BackupError::pack_write("sync index file", &path, e))?;

        debug!(
            "Wrote index file {path:?} ({} bytes)",
            self.buffer.len()
        );

        self.buffer.clear();
        self.next_sequence += 1;
        self.written.push(path.clone());

        Ok(Some(path))
    }

    pub(crate) fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

/// Reads every record of one index file.
pub fn read_index_file(path: &Path) -> Result<Vec<IndexEntry>, ReadIndexError> {
    let file = File::open(path).map_err(|source| ReadIndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| ReadIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let entry = serde_json::from_str(&line).map_err(|source| ReadIndexError::Parse {
            path: path.to_path_buf(),
            line: number + 1,
            source,
        })?;
        entries.push(entry);
    }

    Ok(entries)
}

fn byte_length(bytes: &[u8]) -> u64 {
    u64::try_from(bytes.len()).unwrap_or(u64::MAX)
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ReadIndexError {
    #[error("Failed to read index file {path:?}:\n{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid record on line {line} of index file {path:?}:\n{source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
