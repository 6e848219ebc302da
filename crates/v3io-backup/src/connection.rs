//! Connection manager for the data container.
//!

use core::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    BackupError, CancelToken,
    config::Config,
    container::{Container, ContainerError, ContainerErrorKind, Credentials},
    entry::{ChildEntry, normalise_path},
};

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Upper bound for the delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// The delay after the failed attempt number `attempt`, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Owns the container handle for one session.
///
/// Every call is independent, so one manager is shared by all scanner
/// workers. Transient failures are retried here and never cross this
/// boundary as such.
pub struct ConnectionManager {
    container: Box<dyn Container>,
    endpoint: String,
    credentials: Credentials,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl ConnectionManager {
    /// Create a manager around a container client.
    pub fn new(config: &Config, container: Box<dyn Container>, cancel: CancelToken) -> Self {
        Self {
            container,
            endpoint: config.normalised_endpoint(),
            credentials: config.credentials(),
            timeout: config.http_timeout(),
            retry: config.retry_policy(),
            cancel,
        }
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Establishes the session and checks that `check_path` can be listed.
    ///
    /// Only a rejected or unreachable endpoint fails as
    /// [`BackupError::Connection`]. Any other failure of the check listing
    /// is returned unchanged, the scanner classifies that subtree itself.
    pub fn connect(&self, check_path: &str) -> Result<(), BackupError> {
        self.container
            .connect(&self.credentials, self.timeout)
            .map_err(|source| BackupError::Connection {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let check_path = normalise_path(check_path);
        let children = self.list(&check_path)?;
        info!(
            "Connected to '{}', '{check_path}' has {} children",
            self.endpoint,
            children.len()
        );

        Ok(())
    }

    /// Releases the session.
    pub fn disconnect(&self) {
        match self.container.disconnect() {
            Ok(()) => debug!("Disconnected from '{}'", self.endpoint),
            Err(error) => warn!("Failed to disconnect from '{}': {error}", self.endpoint),
        }
    }

    /// Lists the children of a directory.
    pub fn list(&self, path: &str) -> Result<Vec<ChildEntry>, BackupError> {
        self.call("list", path, |container| container.list(path, self.timeout))
    }

    /// Reads the content of an entry.
    pub fn get(&self, path: &str) -> Result<Vec<u8>, BackupError> {
        self.call("read", path, |container| container.get(path, self.timeout))
    }

    fn call<T>(
        &self,
        action: &'static str,
        path: &str,
        operation: impl Fn(&dyn Container) -> Result<T, ContainerError>,
    ) -> Result<T, BackupError> {
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let error = match operation(self.container.as_ref()) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(self.classify(action, path, error));
            }

            if attempt >= self.retry.max_attempts {
                return Err(BackupError::Transient {
                    action,
                    path: path.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.retry.backoff(attempt);
            debug!("Attempt {attempt} to {action} '{path}' failed: {error}. Retrying in {delay:?}");

            if self.cancel.wait(delay) {
                return Err(BackupError::Cancelled);
            }

            attempt += 1;
        }
    }

    fn classify(&self, action: &'static str, path: &str, error: ContainerError) -> BackupError {
        match error.kind {
            ContainerErrorKind::NotFound => BackupError::NotFound {
                path: path.to_string(),
            },
            ContainerErrorKind::Unauthorized | ContainerErrorKind::Unreachable => {
                BackupError::Connection {
                    endpoint: self.endpoint.clone(),
                    source: error,
                }
            }
            ContainerErrorKind::Transient | ContainerErrorKind::Other => BackupError::FatalScan {
                action,
                path: path.to_string(),
                source: error,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }
}
