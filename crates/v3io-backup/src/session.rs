//! Session bookkeeping.
//!

use core::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Leaf entries returned by listings.
    pub entries_scanned: u64,

    /// Entries written to a pack file.
    pub entries_packed: u64,

    /// Entries dropped by a filter, the cutoff or as duplicates.
    pub entries_skipped: u64,

    /// Entries whose content could not be read.
    pub entries_failed: u64,

    /// Directories that no longer existed when listed.
    pub subtrees_missing: u64,

    /// Directories whose listing kept failing after every retry.
    pub subtrees_failed: u64,

    /// Content bytes written to pack files.
    pub bytes_packed: u64,

    /// Pack files written.
    pub pack_files: u64,

    /// Index files written.
    pub index_files: u64,
}

impl SessionCounters {
    /// Whether any entry or subtree failed.
    pub fn has_failures(&self) -> bool {
        self.entries_failed > 0 || self.subtrees_failed > 0
    }

    /// Skipped entries plus missing subtrees.
    pub fn total_skipped(&self) -> u64 {
        self.entries_skipped + self.subtrees_missing
    }
}

/// Live counters shared between the scanner workers and the pack writer.
#[derive(Debug, Default)]
pub struct SessionStats {
    entries_scanned: AtomicU64,
    entries_packed: AtomicU64,
    entries_skipped: AtomicU64,
    entries_failed: AtomicU64,
    subtrees_missing: AtomicU64,
    subtrees_failed: AtomicU64,
    bytes_packed: AtomicU64,
    pack_files: AtomicU64,
    index_files: AtomicU64,
}

impl SessionStats {
    #[allow(missing_docs)]
    pub fn entry_scanned(&self) {
        self.entries_scanned.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn entry_packed(&self, bytes: u64) {
        self.entries_packed.fetch_add(1, Ordering::Relaxed);
        self.bytes_packed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn entry_skipped(&self) {
        self.entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn entry_failed(&self) {
        self.entries_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn subtree_missing(&self) {
        self.subtrees_missing.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn subtree_failed(&self) {
        self.subtrees_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn pack_file_written(&self) {
        self.pack_files.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    pub fn index_file_written(&self) {
        self.index_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Read the current values.
    pub fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            entries_scanned: self.entries_scanned.load(Ordering::Relaxed),
            entries_packed: self.entries_packed.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            entries_failed: self.entries_failed.load(Ordering::Relaxed),
            subtrees_missing: self.subtrees_missing.load(Ordering::Relaxed),
            subtrees_failed: self.subtrees_failed.load(Ordering::Relaxed),
            bytes_packed: self.bytes_packed.load(Ordering::Relaxed),
            pack_files: self.pack_files.load(Ordering::Relaxed),
            index_files: self.index_files.load(Ordering::Relaxed),
        }
    }
}

/// Summary of one backup invocation, persisted as `session.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSession {
    /// The target repository.
    pub repository: String,

    /// The source endpoint.
    pub endpoint: String,

    /// The source container.
    pub container: String,

    /// The source root paths.
    pub paths: Vec<String>,

    /// The exclusion patterns.
    pub exclude_filters: Vec<String>,

    /// The incremental cutoff, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_after: Option<DateTime<Utc>>,

    /// The pack file size limit in bytes.
    pub pack_file_size_limit: u64,

    /// The index file size limit in bytes.
    pub index_file_size_limit: u64,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// When the session finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Final counters.
    pub counters: SessionCounters,

    /// Pack files written, relative to the session directory.
    pub pack_files: Vec<String>,

    /// Index files written, relative to the session directory.
    pub index_files: Vec<String>,

    /// The fatal error that ended the session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
