use core::time::Duration;
use std::{
    collections::HashMap,
    fs,
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{Container, ContainerError, Credentials};
use crate::entry::{ChildEntry, FileInfo, join_path};

const FILE_SCHEME: &str = "file://";

/// A data container mounted on the local filesystem.
///
/// Local filesystem calls cannot be interrupted, so the per-call timeout is
/// not enforced by this client.
#[derive(Debug, Clone)]
pub struct LocalContainer {
    root: PathBuf,
}

impl LocalContainer {
    /// A container named `container` below the mount point `mount`.
    pub fn new(mount: impl Into<PathBuf>, container: &str) -> Self {
        let mount = mount.into();
        let container = container.trim_matches('/');

        let root = if container.is_empty() {
            mount
        } else {
            mount.join(container)
        };

        Self { root }
    }

    /// Create a client for a `file://` endpoint, `None` for any other scheme.
    pub fn from_endpoint(endpoint: &str, container: &str) -> Option<Self> {
        let mount = endpoint.strip_prefix(FILE_SCHEME)?;
        Some(Self::new(mount, container))
    }

    /// The directory holding the container content.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ContainerError> {
        let relative = Path::new(path.trim_start_matches('/'));

        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(ContainerError::other(format!(
                "path '{path}' escapes the container"
            )));
        }

        Ok(self.root.join(relative))
    }
}

impl Container for LocalContainer {
    fn connect(&self, _credentials: &Credentials, _timeout: Duration) -> Result<(), ContainerError> {
        let metadata = fs::metadata(&self.root).map_err(|e| {
            ContainerError::unreachable(format!(
                "container directory {:?} is not accessible: {e}",
                self.root
            ))
        })?;

        if !metadata.is_dir() {
            return Err(ContainerError::unreachable(format!(
                "container path {:?} is not a directory",
                self.root
            )));
        }

        Ok(())
    }

    fn disconnect(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    fn list(&self, path: &str, _timeout: Duration) -> Result<Vec<ChildEntry>, ContainerError> {
        let directory = self.resolve(path)?;

        let read_dir = fs::read_dir(&directory)
            .map_err(|e| ContainerError::from_io(e, format!("list '{path}'")))?;

        let mut children = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| ContainerError::from_io(e, format!("list '{path}'")))?;

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 name in '{path}': {:?}", entry.file_name());
                continue;
            };
            let child_path = join_path(path, &name);

            let file_type = entry
                .file_type()
                .map_err(|e| ContainerError::from_io(e, format!("stat '{child_path}'")))?;

            if file_type.is_dir() {
                children.push(ChildEntry::Directory(child_path));
                continue;
            }

            if !file_type.is_file() {
                debug!("Skipping special file '{child_path}'");
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| ContainerError::from_io(e, format!("stat '{child_path}'")))?;
            let modified = metadata
                .modified()
                .map_err(|e| ContainerError::from_io(e, format!("stat '{child_path}'")))?;

            #[cfg_attr(not(unix), allow(unused_mut))]
            let mut attributes = HashMap::new();
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                attributes.insert("mode".to_string(), format!("{:o}", metadata.mode()));
            }

            children.push(ChildEntry::File(FileInfo {
                path: child_path,
                size: metadata.len(),
                modified: DateTime::<Utc>::from(modified),
                attributes,
            }));
        }

        // Directory order from the OS is arbitrary.
        children.sort_by(|a, b| child_name(a).cmp(child_name(b)));

        Ok(children)
    }

    fn get(&self, path: &str, _timeout: Duration) -> Result<Vec<u8>, ContainerError> {
        let file = self.resolve(path)?;
        fs::read(&file).map_err(|e| ContainerError::from_io(e, format!("read '{path}'")))
    }
}

fn child_name(child: &ChildEntry) -> &str {
    match child {
        ChildEntry::Directory(path) => path,
        ChildEntry::File(info) => &info.path,
    }
}
