use core::time::Duration;
use std::{
    collections::HashMap,
    io::Read,
    sync::{PoisonError, RwLock},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use super::{Container, ContainerError, ContainerErrorKind, Credentials};
use crate::entry::{ChildEntry, FileInfo};

const SESSION_KEY_HEADER: &str = "X-v3io-session-key";

/// Listing page size requested from the web API.
pub const LIST_PAGE_SIZE: usize = 1000;

/// A data container served by the V3IO web API.
///
/// Listings use the bucket-style `GetContainerContents` call and are
/// translated into [`ChildEntry`] values. Objects are read with a plain `GET`.
pub struct WebContainer {
    base: Url,
    container: String,
    agent: ureq::Agent,
    authorization: RwLock<Option<(&'static str, String)>>,
}

impl WebContainer {
    /// Create a client for the container `container` behind an `http(s)://`
    /// endpoint, `None` for any other scheme.
    pub fn from_endpoint(endpoint: &str, container: &str) -> Option<Self> {
        let base = Url::parse(endpoint).ok()?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return None;
        }

        Some(Self {
            base,
            container: container.trim_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().build(),
            authorization: RwLock::new(None),
        })
    }

    /// The URL of an object, or of the container itself for `/`.
    pub fn object_url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().push(&self.container);
            segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
            if path.trim_matches('/').is_empty() {
                segments.push("");
            }
        }
        url
    }

    fn request(&self, url: &Url, timeout: Duration) -> ureq::Request {
        let request = self.agent.get(url.as_str()).timeout(timeout);

        let authorization = self
            .authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match authorization.as_ref() {
            Some((header, value)) => request.set(header, value),
            None => request,
        }
    }

    fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
        timeout: Duration,
    ) -> Result<ListBucketResult, ContainerError> {
        let mut request = self
            .request(&self.object_url("/"), timeout)
            .query("prefix", prefix)
            .query("limit", &limit.to_string());
        if let Some(marker) = marker {
            request = request.query("marker", marker);
        }

        let body = request
            .call()
            .map_err(|e| classify(e, &format!("list '/{prefix}'")))?
            .into_string()
            .map_err(|e| ContainerError::from_io(e, format!("read listing of '/{prefix}'")))?;
        trace!("Listing of '/{prefix}': {body}");

        ListBucketResult::parse(&body)
    }

    /// Whether the directory `path` exists, by listing its parent.
    fn directory_exists(&self, path: &str, timeout: Duration) -> Result<bool, ContainerError> {
        let directory = path.trim_matches('/');
        let parent_prefix = match directory.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/"),
            None => String::new(),
        };
        let wanted = format!("{directory}/");

        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(&parent_prefix, marker.as_deref(), LIST_PAGE_SIZE, timeout)?;
            if page
                .common_prefixes
                .iter()
                .any(|common| common.prefix == wanted)
            {
                return Ok(true);
            }

            match page.next_marker() {
                Some(next) if marker.as_deref() != Some(next) => marker = Some(next.to_string()),
                _ => return Ok(false),
            }
        }
    }
}

impl Container for WebContainer {
    fn connect(&self, credentials: &Credentials, timeout: Duration) -> Result<(), ContainerError> {
        *self
            .authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner) = authorization(credentials);

        match self.list_page("", None, 1, timeout) {
            Ok(_) => Ok(()),
            Err(error) if error.kind == ContainerErrorKind::NotFound => Err(
                ContainerError::unreachable(format!("container '{}' does not exist", self.container)),
            ),
            Err(error) => Err(error),
        }
    }

    fn disconnect(&self) -> Result<(), ContainerError> {
        self.authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn list(&self, path: &str, timeout: Duration) -> Result<Vec<ChildEntry>, ContainerError> {
        let directory = path.trim_matches('/');
        let prefix = if directory.is_empty() {
            String::new()
        } else {
            format!("{directory}/")
        };

        let mut children = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(&prefix, marker.as_deref(), LIST_PAGE_SIZE, timeout)?;
            let next_marker = page.next_marker().map(str::to_string);
            page.into_children(&prefix, &mut children)?;

            match next_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => {
                    debug!("Listing of '{path}' is truncated, continuing after '{next}'");
                    marker = Some(next);
                }
                _ => break,
            }
        }

        // A missing directory is listed as empty by the web API.
        if children.is_empty() && !prefix.is_empty() && !self.directory_exists(path, timeout)? {
            return Err(ContainerError::not_found(format!("'{path}' does not exist")));
        }

        Ok(children)
    }

    fn get(&self, path: &str, timeout: Duration) -> Result<Vec<u8>, ContainerError> {
        let response = self
            .request(&self.object_url(path), timeout)
            .call()
            .map_err(|e| classify(e, &format!("read '{path}'")))?;

        let mut content = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut content)
            .map_err(|e| ContainerError::from_io(e, format!("read '{path}'")))?;

        Ok(content)
    }
}

/// The header that carries the credentials, preferring the access key.
fn authorization(credentials: &Credentials) -> Option<(&'static str, String)> {
    if let Some(access_key) = credentials.access_key.as_deref().filter(|key| !key.is_empty()) {
        return Some((SESSION_KEY_HEADER, access_key.to_string()));
    }

    let username = credentials.username.as_deref().filter(|name| !name.is_empty())?;
    let password = credentials.password.as_deref().unwrap_or_default();
    let encoded = STANDARD.encode(format!("{username}:{password}"));

    Some(("Authorization", format!("Basic {encoded}")))
}

/// Maps an HTTP status code onto a container error kind.
pub fn status_kind(status: u16) -> ContainerErrorKind {
    match status {
        404 => ContainerErrorKind::NotFound,
        401 | 403 => ContainerErrorKind::Unauthorized,
        408 | 429 | 500..=599 => ContainerErrorKind::Transient,
        _ => ContainerErrorKind::Other,
    }
}

fn classify(error: ureq::Error, action: &str) -> ContainerError {
    match error {
        ureq::Error::Status(status, response) => ContainerError::new(
            status_kind(status),
            format!("{action}: HTTP {status} {}", response.status_text()),
        ),
        ureq::Error::Transport(transport) => {
            let kind = match transport.kind() {
                ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
                    ContainerErrorKind::Unreachable
                }
                ureq::ErrorKind::Io => ContainerErrorKind::Transient,
                _ => ContainerErrorKind::Other,
            };
            ContainerError::new(kind, format!("{action}: {transport}"))
        }
    }
}

/// One page of a `GetContainerContents` response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    next_marker: Option<String>,

    #[serde(default)]
    is_truncated: Option<String>,

    #[serde(default)]
    contents: Vec<Contents>,

    #[serde(default)]
    common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Contents {
    key: String,

    #[serde(default)]
    size: u64,

    #[serde(default)]
    last_modified: Option<String>,

    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommonPrefix {
    prefix: String,
}

impl ListBucketResult {
    /// Parse a listing page.
    pub fn parse(body: &str) -> Result<Self, ContainerError> {
        quick_xml::de::from_str(body)
            .map_err(|e| ContainerError::other(format!("malformed listing: {e}")))
    }

    /// The marker to continue from if the listing is truncated.
    pub fn next_marker(&self) -> Option<&str> {
        let truncated = self
            .is_truncated
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

        self.next_marker
            .as_deref()
            .map(str::trim)
            .filter(|marker| truncated && !marker.is_empty())
    }

    /// Appends the children below `prefix` in this page.
    pub fn into_children(
        self,
        prefix: &str,
        children: &mut Vec<ChildEntry>,
    ) -> Result<(), ContainerError> {
        for common in self.common_prefixes {
            let directory = common.prefix.trim_end_matches('/');
            if directory.is_empty() || common.prefix == prefix {
                continue;
            }
            children.push(ChildEntry::Directory(format!("/{directory}")));
        }

        for object in self.contents {
            if object.key == prefix || object.key.ends_with('/') {
                continue;
            }

            let modified = match object.last_modified.as_deref() {
                Some(text) => DateTime::parse_from_rfc3339(text.trim())
                    .map(|modified| modified.with_timezone(&Utc))
                    .map_err(|e| {
                        ContainerError::other(format!(
                            "invalid modification time '{text}' of '/{}': {e}",
                            object.key
                        ))
                    })?,
                None => {
                    return Err(ContainerError::other(format!(
                        "listing has no modification time for '/{}'",
                        object.key
                    )));
                }
            };

            let mut attributes = HashMap::new();
            if let Some(mode) = object.mode {
                attributes.insert("mode".to_string(), mode);
            }

            children.push(ChildEntry::File(FileInfo {
                path: format!("/{}", object.key.trim_start_matches('/')),
                size: object.size,
                modified,
                attributes,
            }));
        }

        Ok(())
    }
}
