//! Remote data container clients.
//!
//! The backup only needs directory listings and object reads from the
//! container. `http(s)://` endpoints are served by the V3IO web API client,
//! `file://` endpoints by a locally mounted container. Every call returns a
//! classified [`ContainerError`] so the connection manager can decide whether
//! to retry, skip or abort.
//!

use core::{fmt, time::Duration};
use std::{io, sync::Arc};

use thiserror::Error;

use crate::{BackupError, config::Config, entry::ChildEntry};

mod local;
mod mock;
mod web;

pub use local::LocalContainer;
pub use mock::{Fault, MockContainer};
pub use web::WebContainer;

/// Credentials presented to the container on connect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Username of the container user.
    pub username: Option<String>,

    /// Password of the container user.
    pub password: Option<String>,

    /// Access key, takes precedence over username and password.
    pub access_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "SANITIZED"))
            .field("access_key", &self.access_key.as_ref().map(|_| "SANITIZED"))
            .finish()
    }
}

/// A client for the remote data container.
pub trait Container: Send + Sync {
    /// Establish the session with the container.
    fn connect(&self, credentials: &Credentials, timeout: Duration) -> Result<(), ContainerError>;

    /// Release the session.
    fn disconnect(&self) -> Result<(), ContainerError>;

    /// List the direct children of a directory.
    fn list(&self, path: &str, timeout: Duration) -> Result<Vec<ChildEntry>, ContainerError>;

    /// Read the content of a leaf entry.
    fn get(&self, path: &str, timeout: Duration) -> Result<Vec<u8>, ContainerError>;
}

impl<C: Container + ?Sized> Container for Arc<C> {
    fn connect(&self, credentials: &Credentials, timeout: Duration) -> Result<(), ContainerError> {
        (**self).connect(credentials, timeout)
    }

    fn disconnect(&self) -> Result<(), ContainerError> {
        (**self).disconnect()
    }

    fn list(&self, path: &str, timeout: Duration) -> Result<Vec<ChildEntry>, ContainerError> {
        (**self).list(path, timeout)
    }

    fn get(&self, path: &str, timeout: Duration) -> Result<Vec<u8>, ContainerError> {
        (**self).get(path, timeout)
    }
}

/// Creates the container client for the configured endpoint.
pub fn open(config: &Config) -> Result<Box<dyn Container>, BackupError> {
    let endpoint = config.normalised_endpoint();

    if let Some(container) = LocalContainer::from_endpoint(&endpoint, &config.container) {
        return Ok(Box::new(container));
    }

    if let Some(container) = WebContainer::from_endpoint(&endpoint, &config.container) {
        return Ok(Box::new(container));
    }

    Err(BackupError::Connection {
        endpoint: endpoint.clone(),
        source: ContainerError::unreachable(format!(
            "no container client is available for endpoint '{endpoint}'"
        )),
    })
}

/// Classification of a container call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerErrorKind {
    /// The path does not exist.
    NotFound,

    /// Timeout or server-side failure, the call may succeed if retried.
    Transient,

    /// The credentials were rejected.
    Unauthorized,

    /// The endpoint could not be reached.
    Unreachable,

    /// Any other failure.
    Other,
}

impl fmt::Display for ContainerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Transient => "transient failure",
            Self::Unauthorized => "unauthorized",
            Self::Unreachable => "unreachable",
            Self::Other => "failure",
        };

        f.write_str(name)
    }
}

/// A classified failure of a container call.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ContainerError {
    /// The classification.
    pub kind: ContainerErrorKind,

    /// What went wrong.
    pub message: String,

    /// The underlying I/O error, if any.
    #[source]
    pub source: Option<io::Error>,
}

impl ContainerError {
    /// Create an error without an underlying cause.
    pub fn new(kind: ContainerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[allow(missing_docs)]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ContainerErrorKind::NotFound, message)
    }

    #[allow(missing_docs)]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ContainerErrorKind::Transient, message)
    }

    #[allow(missing_docs)]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ContainerErrorKind::Unauthorized, message)
    }

    #[allow(missing_docs)]
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ContainerErrorKind::Unreachable, message)
    }

    #[allow(missing_docs)]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ContainerErrorKind::Other, message)
    }

    /// Classify an I/O error.
    pub fn from_io(error: io::Error, message: impl Into<String>) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::NotFound => ContainerErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ContainerErrorKind::Unauthorized,
            io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
                ContainerErrorKind::Transient
            }
            _ => ContainerErrorKind::Other,
        };

        Self {
            kind,
            message: message.into(),
            source: Some(error),
        }
    }

    /// Whether retrying the call may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind == ContainerErrorKind::Transient
    }
}
