//! Backup error taxonomy.
//!

use core::fmt;
use std::{io, path::PathBuf};

use thiserror::Error;

use crate::container::ContainerError;

/// Classification of a [`BackupError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid configuration, raised before any work starts.
    Config,

    /// The endpoint is unreachable or the credentials were rejected.
    Connection,

    /// A path does not exist. Recoverable, treated as empty.
    NotFound,

    /// A timeout or server failure that persisted through every retry.
    Transient,

    /// An unrecoverable failure that aborts the whole session.
    FatalScan,

    /// A local I/O failure while writing the archive.
    PackWrite,

    /// The session was cancelled.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Connection => "connection",
            Self::NotFound => "not found",
            Self::Transient => "transient",
            Self::FatalScan => "fatal scan",
            Self::PackWrite => "pack write",
            Self::Cancelled => "cancelled",
        };

        f.write_str(name)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid exclude filter '{pattern}':\n{source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to connect to '{endpoint}':\n{source}")]
    Connection {
        endpoint: String,
        #[source]
        source: ContainerError,
    },

    #[error("Path '{path}' does not exist")]
    NotFound { path: String },

    #[error("Failed to {action} '{path}' after {attempts} attempts:\n{source}")]
    Transient {
        action: &'static str,
        path: String,
        attempts: u32,
        #[source]
        source: ContainerError,
    },

    #[error("Failed to {action} '{path}':\n{source}")]
    FatalScan {
        action: &'static str,
        path: String,
        #[source]
        source: ContainerError,
    },

    #[error("Failed to spawn a scanner worker:\n{0}")]
    SpawnWorker(#[source] io::Error),

    #[error("Failed to {action} {path:?}:\n{source}")]
    PackWrite {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize index entry for '{path}':\n{source}")]
    SerializeIndex {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("The backup session was cancelled")]
    Cancelled,
}

impl BackupError {
    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidFilter { .. } => ErrorKind::Config,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::FatalScan { .. } | Self::SpawnWorker(_) => ErrorKind::FatalScan,
            Self::PackWrite { .. } | Self::SerializeIndex { .. } => ErrorKind::PackWrite,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Wrap a local I/O failure while writing the archive.
    pub fn pack_write(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PackWrite {
            action,
            path: path.into(),
            source,
        }
    }
}
