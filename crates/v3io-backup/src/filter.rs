//! Exclusion filters.
//!

use regex::Regex;

use crate::BackupError;

/// A compiled, ordered set of exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    patterns: Vec<Regex>,
}

impl EntryFilter {
    /// Compiles every pattern, failing on the first invalid one.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BackupError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|source| BackupError::InvalidFilter {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Whether any pattern matches `path`.
    pub fn excludes(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(path))
    }

    /// The source patterns in configured order.
    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .iter()
            .map(|pattern| pattern.as_str().to_string())
            .collect()
    }

    /// Whether the filter excludes nothing.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
