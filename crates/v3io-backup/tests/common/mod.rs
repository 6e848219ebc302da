//! # common
//!

#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use chrono::{DateTime, TimeZone, Utc};
use v3io_backup::{
    CancelToken,
    config::Config,
    connection::ConnectionManager,
    container::MockContainer,
    entry::FileInfo,
    iterator::EntryIterator,
    repository::{Repository, SessionLayout},
    session::SessionStats,
};

/// A fixed point in time, `seconds` after an arbitrary epoch.
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

/// A config for the mock container with fast retries.
pub fn test_config(repository: &Path) -> Config {
    let mut config = Config {
        web_api_endpoint: "mock://v3io".to_string(),
        container: "bigdata".to_string(),
        http_timeout: "200ms".to_string(),
        scanner_parallelism: 4,
        ..Config::default()
    };

    config.retry.max_attempts = 3;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;

    config.backup.repository = repository.to_string_lossy().into_owned();

    config
}

pub fn manager(
    config: &Config,
    mock: &Arc<MockContainer>,
    cancel: &CancelToken,
) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        config,
        Box::new(Arc::clone(mock)),
        cancel.clone(),
    ))
}

pub fn stats() -> Arc<SessionStats> {
    Arc::new(SessionStats::default())
}

/// Drains the iterator, returning the sorted paths it produced.
pub fn drain_paths(iterator: &mut EntryIterator) -> Vec<String> {
    let mut paths = Vec::new();
    while iterator.advance() {
        paths.push(iterator.at().unwrap().path.clone());
    }
    paths.sort();
    paths
}

pub fn file(path: &str, size: u64, modified: DateTime<Utc>) -> FileInfo {
    FileInfo::new(path, size, modified)
}

/// A fresh session directory inside `repository`.
pub fn new_session(repository: &Path, seconds: i64) -> SessionLayout {
    Repository::open(&repository.to_string_lossy())
        .unwrap()
        .create_session(at(seconds))
        .unwrap()
}
