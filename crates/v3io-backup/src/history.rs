//! Backup history
//!

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HISTORY_FILE: &str = "history.json";

/// When each (container, paths) pair was last backed up successfully.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct History {
    /// Session start times keyed by [`History::key`].
    pub history: HashMap<String, DateTime<Utc>>,

    #[serde(skip)]
    file_path: PathBuf,
}

impl History {
    /// Tries to load the history of a repository, creating it if it does not exist.
    pub fn load_or_create_file(repository: &Path) -> Result<Self, LoadHistoryError> {
        let file_path = repository.join(HISTORY_FILE);

        if !file_path.exists() {
            let history = Self {
                history: HashMap::new(),
                file_path,
            };
            history.save()?;
            return Ok(history);
        }

        let contents = fs::read_to_string(&file_path).map_err(LoadHistoryError::ReadFile)?;
        let mut history: Self = serde_json::from_str(&contents)?;
        history.file_path = file_path;

        Ok(history)
    }

    /// The history key of a container and its backed up paths.
    pub fn key<S: AsRef<str>>(container: &str, paths: &[S]) -> String {
        let mut paths: Vec<&str> = paths.iter().map(AsRef::as_ref).collect();
        paths.sort_unstable();
        paths.dedup();

        format!("{container}:{}", paths.join(","))
    }

    /// The start time of the last successful session for a key.
    pub fn last_success(&self, key: &str) -> Option<DateTime<Utc>> {
        self.history.get(key).copied()
    }

    /// Update the history for a key and save.
    pub fn update(&mut self, key: String, started_at: DateTime<Utc>) -> Result<(), SaveHistoryError> {
        self.history.insert(key, started_at);

        self.save()?;

        Ok(())
    }

    /// Save the current history.
    pub fn save(&self) -> Result<(), SaveHistoryError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&self.file_path, contents).map_err(SaveHistoryError::WriteFile)?;
        Ok(())
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadHistoryError {
    #[error("Failed to deserialize history: {0}")]
    Deserialize(#[from] serde_json::error::Error),

    #[error("Failed to read history: {0}")]
    ReadFile(#[source] io::Error),

    #[error("Failed to create new history file: {0}")]
    CreateHistory(#[from] SaveHistoryError),
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SaveHistoryError {
    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::error::Error),

    #[error("Failed to write history file: {0}")]
    WriteFile(#[source] io::Error),
}
