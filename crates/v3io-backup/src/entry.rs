//! Entries produced by a container listing.
//!

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A leaf object discovered in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Absolute path of the entry within the container.
    pub path: String,

    /// Size in bytes as reported by the listing.
    pub size: u64,

    /// Last modification time.
    pub modified: DateTime<Utc>,

    /// Extended attributes reported by the container.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl FileInfo {
    /// Create a new entry without extended attributes.
    pub fn new(path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            attributes: HashMap::new(),
        }
    }
}

/// One child returned by listing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEntry {
    /// A directory that needs to be listed in turn.
    Directory(String),

    /// A leaf entry.
    File(FileInfo),
}

/// Ensures a container path starts with a single `/` and has no trailing `/`.
pub fn normalise_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    format!("/{trimmed}")
}

/// Joins a child name onto a normalised directory path.
pub fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    if parent == "/" || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}

/// The parent directory of a normalised path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }

    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => path.get(..index),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise() {
        assert_eq!(normalise_path("my-data"), "/my-data");
        assert_eq!(normalise_path("/my-data/"), "/my-data");
        assert_eq!(normalise_path(""), "/");
        assert_eq!(normalise_path("/"), "/");
    }

    #[test]
    fn join() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "1.txt"), "/a/1.txt");
        assert_eq!(join_path("/a/", "b"), "/a/b");
    }

    #[test]
    fn parent() {
        assert_eq!(parent_path("/a/1.txt"), Some("/a"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }
}
