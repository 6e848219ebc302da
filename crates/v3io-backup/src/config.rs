//! Backup configuration.
//!
//! The configuration is loaded once at startup, merged with command line
//! overrides and then passed by reference to every component.
//!

use core::{fmt, time::Duration};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{BackupError, connection::RetryPolicy, container::Credentials};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "V3IO_BACKUP_CONFIG";

/// Configuration file used when neither a flag nor the environment names one.
pub const DEFAULT_CONFIG_FILE: &str = "v3io-backup-config.toml";

/// Log level used when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Per-call timeout used when none is configured or it cannot be parsed.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_SCANNER_PARALLELISM: usize = 16;
const DEFAULT_PACK_FILE_SIZE_LIMIT: u64 = 64 * 1024 * 1024; // 64 MiB
const DEFAULT_INDEX_FILE_SIZE_LIMIT: u64 = 1024 * 1024; // 1 MiB

/// Retry behaviour for transient container failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds, doubled for each retry.
    pub initial_backoff_ms: u64,

    /// Upper bound for the delay between retries in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

/// What to back up and where to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupOptions {
    /// The target repository, a local directory or a `file://` URL.
    pub repository: String,

    /// Paths within the container to back up.
    pub paths: Vec<String>,

    /// Regular expressions, matching paths are excluded.
    pub exclude_filters: Vec<String>,

    /// Only back up entries modified strictly after this time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_after: Option<DateTime<Utc>>,

    /// Use the start of the last successful session as `modified_after`.
    pub incremental: bool,

    /// Treat skipped subtrees and failed entries as a failed session.
    pub strict: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            repository: String::new(),
            paths: vec!["/".to_string()],
            exclude_filters: Vec::new(),
            modified_after: None,
            incremental: false,
            strict: false,
        }
    }
}

/// The backup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Web API endpoint of the data platform, `file://` for a mounted container.
    pub web_api_endpoint: String,

    /// The name of the data container.
    pub container: String,

    /// Username of a data platform user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password of the configured user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Access key, takes precedence over username and password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Per-call timeout, e.g. `30s`, `1m30s`, `500ms`.
    pub http_timeout: String,

    /// `debug`, `info`, `warn` or `error`.
    pub log_level: String,

    /// Directory for the rolling log files.
    pub log_directory: PathBuf,

    /// Number of concurrent listing workers.
    pub scanner_parallelism: usize,

    /// Desired size of a single index file in bytes.
    pub index_file_size_limit: u64,

    /// Desired size of a single pack file in bytes.
    pub pack_file_size_limit: u64,

    /// Retry behaviour for transient failures.
    pub retry: RetryConfig,

    /// The backup itself.
    pub backup: BackupOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_api_endpoint: String::new(),
            container: String::new(),
            username: None,
            password: None,
            access_key: None,
            http_timeout: "30s".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_directory: PathBuf::from("./logs"),
            scanner_parallelism: DEFAULT_SCANNER_PARALLELISM,
            index_file_size_limit: DEFAULT_INDEX_FILE_SIZE_LIMIT,
            pack_file_size_limit: DEFAULT_PACK_FILE_SIZE_LIMIT,
            retry: RetryConfig::default(),
            backup: BackupOptions::default(),
        }
    }
}

impl Config {
    /// Tries to load a config from a toml file.
    pub fn load_toml(file_path: &Path) -> Result<Self, LoadConfigError> {
        if !file_path.exists() {
            return Err(LoadConfigError::NoFile(file_path.to_path_buf()));
        }

        let contents = fs::read_to_string(file_path).map_err(LoadConfigError::Read)?;
        if contents.trim().is_empty() {
            return Err(LoadConfigError::Empty(file_path.to_path_buf()));
        }

        let config = toml::from_str(&contents)?;

        Ok(config)
    }

    /// Resolves and loads the configuration file, then fills unset values
    /// from the environment.
    ///
    /// An explicit path must exist. When the default file is absent the
    /// defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, LoadConfigError> {
        let from_env = env::var(CONFIG_ENV_VAR)
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_toml(&path)?,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_toml(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.fill_from_env(|name| env::var(name).ok());

        Ok(config)
    }

    /// Fills unset connection values using `lookup` for environment variables.
    pub fn fill_from_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if self.web_api_endpoint.is_empty() {
            if let Some(endpoint) = lookup("V3IO_API") {
                self.web_api_endpoint = endpoint;
            }
        }

        if self.access_key.is_none() {
            self.access_key = lookup("V3IO_ACCESS_KEY");
        }

        if self.username.is_none() {
            self.username = lookup("V3IO_USERNAME");
        }

        if self.password.is_none() {
            self.password = lookup("V3IO_PASSWORD");
        }

        if self.backup.repository.is_empty() {
            if let Some(repository) = lookup("V3IO_REPOSITORY") {
                self.backup.repository = repository;
            }
        }
    }

    /// Checks the connection and limit settings.
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.web_api_endpoint.trim().is_empty() {
            return Err(BackupError::Config(
                "web API endpoint must be set".to_string(),
            ));
        }

        if self.container.trim().is_empty() {
            return Err(BackupError::Config("container must be set".to_string()));
        }

        if self.scanner_parallelism == 0 {
            return Err(BackupError::Config(
                "scanner parallelism must be at least 1".to_string(),
            ));
        }

        if self.pack_file_size_limit == 0 || self.index_file_size_limit == 0 {
            return Err(BackupError::Config(
                "pack and index file size limits must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(BackupError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The per-call timeout, falling back to the default if it cannot be parsed.
    pub fn http_timeout(&self) -> Duration {
        if self.http_timeout.trim().is_empty() {
            return DEFAULT_HTTP_TIMEOUT;
        }

        match parse_duration(&self.http_timeout) {
            Ok(timeout) => timeout,
            Err(error) => {
                warn!(
                    "Failed to parse http timeout '{}': {error}. Defaulting to {}ms.",
                    self.http_timeout,
                    DEFAULT_HTTP_TIMEOUT.as_millis()
                );
                DEFAULT_HTTP_TIMEOUT
            }
        }
    }

    /// The retry policy for container calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    /// The credentials to present to the container.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            access_key: self.access_key.clone(),
        }
    }

    /// The endpoint with a scheme and without a path.
    pub fn normalised_endpoint(&self) -> String {
        normalise_endpoint(&self.web_api_endpoint)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sanitized = self.clone();
        if sanitized.password.is_some() {
            sanitized.password = Some("SANITIZED".to_string());
        }
        if sanitized.access_key.is_some() {
            sanitized.access_key = Some("SANITIZED".to_string());
        }

        match serde_json::to_string(&sanitized) {
            Ok(json) => f.write_str(&json),
            Err(error) => write!(f, "Unable to read config: {error}"),
        }
    }
}

/// Adds `http://` to endpoints without a scheme and drops any path from
/// http endpoints. `file://` endpoints are returned unchanged.
pub fn normalise_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("file://") {
        return endpoint.to_string();
    }

    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", endpoint),
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();

    format!("{scheme}://{authority}")
}

/// Parses a duration such as `30s`, `1m30s` or `250ms`.
pub fn parse_duration(text: &str) -> Result<Duration, humantime::DurationError> {
    match text.trim() {
        "0" => Ok(Duration::ZERO),
        text => humantime::parse_duration(text),
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("The file {0:?} does not exist.")]
    NoFile(PathBuf),

    #[error("The file {0:?} exists but is empty.")]
    Empty(PathBuf),

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] io::Error),

    #[error("Failed to deserialize the file:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration(" 250ms "), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
    }

    #[test]
    fn invalid_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("3 fortnights").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn unparsable_timeout_falls_back() {
        let config = Config {
            http_timeout: "soon".to_string(),
            ..Config::default()
        };
        assert_eq!(config.http_timeout(), DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn endpoints() {
        assert_eq!(normalise_endpoint("localhost:8081"), "http://localhost:8081");
        assert_eq!(
            normalise_endpoint("https://10.0.0.1:8443/some/path"),
            "https://10.0.0.1:8443"
        );
        assert_eq!(normalise_endpoint("file:///mnt/v3io"), "file:///mnt/v3io");
    }

    #[test]
    fn display_is_sanitized() {
        let config = Config {
            password: Some("hunter2".to_string()),
            access_key: Some("secret-key".to_string()),
            username: Some("admin".to_string()),
            ..Config::default()
        };

        let shown = config.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("secret-key"));
        assert!(shown.contains("SANITIZED"));
        assert!(shown.contains("admin"));
    }

    #[test]
    fn env_fills_only_unset_values() {
        let mut config = Config {
            username: Some("configured".to_string()),
            ..Config::default()
        };

        config.fill_from_env(|name| match name {
            "V3IO_API" => Some("localhost:8081".to_string()),
            "V3IO_USERNAME" => Some("from-env".to_string()),
            "V3IO_ACCESS_KEY" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.web_api_endpoint, "localhost:8081");
        assert_eq!(config.username.as_deref(), Some("configured"));
        assert_eq!(config.access_key, None);
    }
}
