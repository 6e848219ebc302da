use core::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
};

use chrono::{DateTime, Utc};

use super::{Container, ContainerError, Credentials};
use crate::entry::{ChildEntry, FileInfo, normalise_path, parent_path};

/// A failure injected into calls for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The path does not exist.
    NotFound,

    /// The first `n` calls fail with a transient error.
    TransientTimes(u32),

    /// Every call fails with a transient error.
    AlwaysTransient,

    /// Every call fails with an unclassified error.
    Fatal,
}

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    modified: DateTime<Utc>,
    attributes: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Calls {
    lists: HashMap<String, u32>,
    gets: HashMap<String, u32>,
}

/// Mock an in-memory data container.
#[derive(Debug)]
pub struct MockContainer {
    files: BTreeMap<String, MockFile>,
    directories: BTreeSet<String>,
    list_faults: HashMap<String, Fault>,
    get_faults: HashMap<String, Fault>,
    list_delay: Duration,
    reject_credentials: bool,
    unreachable: bool,

    calls: Mutex<Calls>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connected: AtomicBool,
}

impl Default for MockContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContainer {
    /// An empty container holding only the root directory.
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            directories: BTreeSet::from(["/".to_string()]),
            list_faults: HashMap::new(),
            get_faults: HashMap::new(),
            list_delay: Duration::ZERO,
            reject_credentials: false,
            unreachable: false,
            calls: Mutex::new(Calls::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
        }
    }

    /// Add a file, creating its parent directories.
    pub fn with_file(
        mut self,
        path: &str,
        content: impl Into<Vec<u8>>,
        modified: DateTime<Utc>,
    ) -> Self {
        let path = normalise_path(path);
        self.add_parents(&path);
        self.files.insert(
            path,
            MockFile {
                content: content.into(),
                modified,
                attributes: HashMap::new(),
            },
        );
        self
    }

    /// Set an extended attribute on an existing file.
    pub fn with_attribute(mut self, path: &str, name: &str, value: &str) -> Self {
        if let Some(file) = self.files.get_mut(&normalise_path(path)) {
            file.attributes.insert(name.to_string(), value.to_string());
        }
        self
    }

    /// Add an empty directory, creating its parents.
    pub fn with_directory(mut self, path: &str) -> Self {
        let path = normalise_path(path);
        self.add_parents(&path);
        self.directories.insert(path);
        self
    }

    /// Inject a fault into listings of `path`.
    pub fn with_list_fault(mut self, path: &str, fault: Fault) -> Self {
        self.list_faults.insert(normalise_path(path), fault);
        self
    }

    /// Inject a fault into reads of `path`.
    pub fn with_get_fault(mut self, path: &str, fault: Fault) -> Self {
        self.get_faults.insert(normalise_path(path), fault);
        self
    }

    /// Delay every listing, a delay above the call timeout becomes a timeout.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    /// Reject every set of credentials on connect.
    pub fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    /// Fail every connect as unreachable.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// The number of listings of `path` so far.
    pub fn list_calls(&self, path: &str) -> u32 {
        self.lock_calls()
            .lists
            .get(&normalise_path(path))
            .copied()
            .unwrap_or(0)
    }

    /// The number of reads of `path` so far.
    pub fn get_calls(&self, path: &str) -> u32 {
        self.lock_calls()
            .gets
            .get(&normalise_path(path))
            .copied()
            .unwrap_or(0)
    }

    /// The highest number of listings that were in flight at once.
    pub fn max_concurrent_lists(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Whether the container is between connect and disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn add_parents(&mut self, path: &str) {
        let mut current = parent_path(path);
        while let Some(parent) = current {
            self.directories.insert(parent.to_string());
            current = parent_path(parent);
        }
    }

    fn lock_calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_fault(
        faults: &HashMap<String, Fault>,
        path: &str,
        attempt: u32,
    ) -> Result<(), ContainerError> {
        match faults.get(path) {
            None => Ok(()),
            Some(Fault::NotFound) => Err(ContainerError::not_found(format!("'{path}' (injected)"))),
            Some(Fault::TransientTimes(times)) if attempt <= *times => Err(
                ContainerError::transient(format!("'{path}' attempt {attempt} (injected)")),
            ),
            Some(Fault::TransientTimes(_)) => Ok(()),
            Some(Fault::AlwaysTransient) => Err(ContainerError::transient(format!(
                "'{path}' attempt {attempt} (injected)"
            ))),
            Some(Fault::Fatal) => Err(ContainerError::other(format!("'{path}' (injected)"))),
        }
    }

    fn list_children(
        &self,
        path: &str,
        attempt: u32,
        timeout: Duration,
    ) -> Result<Vec<ChildEntry>, ContainerError> {
        if !self.list_delay.is_zero() {
            if self.list_delay > timeout {
                thread::sleep(timeout);
                return Err(ContainerError::transient(format!(
                    "listing '{path}' timed out after {timeout:?}"
                )));
            }
            thread::sleep(self.list_delay);
        }

        Self::check_fault(&self.list_faults, path, attempt)?;

        if !self.directories.contains(path) {
            if self.files.contains_key(path) {
                return Err(ContainerError::other(format!("'{path}' is not a directory")));
            }
            return Err(ContainerError::not_found(format!("'{path}'")));
        }

        let directories = self
            .directories
            .iter()
            .filter(|directory| parent_path(directory) == Some(path))
            .map(|directory| ChildEntry::Directory(directory.clone()));

        let files = self
            .files
            .iter()
            .filter(|(file, _)| parent_path(file) == Some(path))
            .map(|(file, mock)| {
                ChildEntry::File(FileInfo {
                    path: file.clone(),
                    size: u64::try_from(mock.content.len()).unwrap_or(u64::MAX),
                    modified: mock.modified,
                    attributes: mock.attributes.clone(),
                })
            });

        Ok(directories.chain(files).collect())
    }
}

impl Container for MockContainer {
    fn connect(&self, _credentials: &Credentials, _timeout: Duration) -> Result<(), ContainerError> {
        if self.unreachable {
            return Err(ContainerError::unreachable("endpoint is unreachable (injected)"));
        }

        if self.reject_credentials {
            return Err(ContainerError::unauthorized("credentials rejected (injected)"));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ContainerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self, path: &str, timeout: Duration) -> Result<Vec<ChildEntry>, ContainerError> {
        let path = normalise_path(path);
        let attempt = {
            let mut calls = self.lock_calls();
            let count = calls.lists.entry(path.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let result = self.list_children(&path, attempt, timeout);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn get(&self, path: &str, _timeout: Duration) -> Result<Vec<u8>, ContainerError> {
        let path = normalise_path(path);
        let attempt = {
            let mut calls = self.lock_calls();
            let count = calls.gets.entry(path.clone()).or_insert(0);
            *count += 1;
            *count
        };

        Self::check_fault(&self.get_faults, &path, attempt)?;

        self.files
            .get(&path)
            .map(|file| file.content.clone())
            .ok_or_else(|| ContainerError::not_found(format!("'{path}'")))
    }
}
