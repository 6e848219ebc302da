//! Parallel traversal of the container namespace.
//!
//! A fixed pool of workers pulls directories from an unbounded work queue,
//! lists them and pushes surviving leaf entries into a bounded result queue
//! that the [`EntryIterator`] drains. The bounded queue gives backpressure:
//! a slow consumer blocks the workers instead of growing the buffer.
//!

use core::sync::atomic::{AtomicUsize, Ordering};
use std::{collections::BTreeSet, sync::Arc, thread};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use tracing::{debug, error, warn};

use crate::{
    BackupError, CancelToken, ErrorKind,
    connection::ConnectionManager,
    entry::{ChildEntry, FileInfo, normalise_path},
    filter::EntryFilter,
    iterator::{EntryIterator, ScanEvent},
    session::SessionStats,
};

/// Result queue slots per worker.
const RESULTS_PER_WORKER: usize = 64;

/// What to scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    paths: Vec<String>,
    filter: EntryFilter,
    modified_after: Option<DateTime<Utc>>,
}

impl ScanRequest {
    /// Validates the roots and compiles the exclusion patterns.
    pub fn new<S: AsRef<str>>(
        paths: &[S],
        exclude_filters: &[S],
        modified_after: Option<DateTime<Utc>>,
    ) -> Result<Self, BackupError> {
        let paths: Vec<String> = paths
            .iter()
            .map(|path| normalise_path(path.as_ref()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if paths.is_empty() {
            return Err(BackupError::Config(
                "at least one path to back up must be set".to_string(),
            ));
        }

        let filter = EntryFilter::compile(exclude_filters)?;

        Ok(Self {
            paths,
            filter,
            modified_after,
        })
    }

    /// Replaces the incremental cutoff.
    #[must_use]
    pub fn with_modified_after(mut self, modified_after: Option<DateTime<Utc>>) -> Self {
        self.modified_after = modified_after;
        self
    }

    /// The normalised root paths.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// The compiled exclusion filter.
    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }

    /// The incremental cutoff.
    pub fn modified_after(&self) -> Option<DateTime<Utc>> {
        self.modified_after
    }

    /// Whether an entry passes the filter and the cutoff.
    pub fn accepts(&self, entry: &FileInfo) -> bool {
        if self.filter.excludes(&entry.path) {
            return false;
        }

        match self.modified_after {
            Some(cutoff) => entry.modified > cutoff,
            None => true,
        }
    }
}

enum Job {
    List(String),
    Shutdown,
}

/// Scans the container with bounded parallelism.
pub struct Scanner {
    connection: Arc<ConnectionManager>,
    parallelism: usize,
    stats: Arc<SessionStats>,
    cancel: CancelToken,
}

impl Scanner {
    #[allow(missing_docs)]
    pub fn new(
        connection: Arc<ConnectionManager>,
        parallelism: usize,
        stats: Arc<SessionStats>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            connection,
            parallelism: parallelism.max(1),
            stats,
            cancel,
        }
    }

    /// Starts the workers and returns the iterator over their results.
    pub fn scan(&self, request: &ScanRequest) -> Result<EntryIterator, BackupError> {
        let (work_sender, work_receiver) = unbounded();
        let (result_sender, result_receiver) = bounded(self.parallelism * RESULTS_PER_WORKER);

        let pending = Arc::new(AtomicUsize::new(request.paths.len()));
        for path in &request.paths {
            work_sender
                .send(Job::List(path.clone()))
                .map_err(|_| BackupError::Cancelled)?;
        }

        let request = Arc::new(request.clone());
        let mut workers = Vec::with_capacity(self.parallelism);
        for index in 0..self.parallelism {
            let worker = Worker {
                connection: Arc::clone(&self.connection),
                request: Arc::clone(&request),
                stats: Arc::clone(&self.stats),
                cancel: self.cancel.clone(),
                jobs: work_receiver.clone(),
                work: work_sender.clone(),
                results: result_sender.clone(),
                pending: Arc::clone(&pending),
                parallelism: self.parallelism,
            };

            let spawned = thread::Builder::new()
                .name(format!("scanner-{index}"))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    // Stop the workers that already started.
                    self.cancel.cancel();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(BackupError::SpawnWorker(source));
                }
            }
        }

        Ok(EntryIterator::new(
            result_receiver,
            workers,
            self.cancel.clone(),
        ))
    }
}

struct Worker {
    connection: Arc<ConnectionManager>,
    request: Arc<ScanRequest>,
    stats: Arc<SessionStats>,
    cancel: CancelToken,
    jobs: Receiver<Job>,
    work: Sender<Job>,
    results: Sender<ScanEvent>,
    pending: Arc<AtomicUsize>,
    parallelism: usize,
}

impl Worker {
    fn run(self) {
        loop {
            select! {
                recv(self.jobs) -> job => match job {
                    Ok(Job::List(path)) => {
                        if !self.list_directory(&path) {
                            break;
                        }
                    }
                    Ok(Job::Shutdown) | Err(_) => break,
                },
                recv(self.cancel.receiver()) -> _ => break,
            }
        }
    }

    /// Lists one directory, returns `false` if the worker must stop.
    fn list_directory(&self, path: &str) -> bool {
        let children = match self.connection.list(path) {
            Ok(children) => children,
            Err(error) => match error.kind() {
                ErrorKind::NotFound => {
                    warn!("[{path}] Subtree no longer exists, skipping it");
                    self.stats.subtree_missing();
                    return self.finish_job();
                }

                ErrorKind::Transient => {
                    error!("[{path}] Subtree failed: {error}");
                    self.stats.subtree_failed();
                    return self.finish_job();
                }

                ErrorKind::Cancelled => return false,

                _ => {
                    self.emit(ScanEvent::Fatal(error));
                    return false;
                }
            },
        };

        debug!("[{path}] Listed {} children", children.len());

        for child in children {
            match child {
                ChildEntry::Directory(directory) => {
                    self.pending.fetch_add(1, Ordering::AcqRel);
                    if self.work.send(Job::List(directory)).is_err() {
                        return false;
                    }
                }

                ChildEntry::File(entry) => {
                    self.stats.entry_scanned();

                    if !self.request.accepts(&entry) {
                        debug!("[{path}] Skipping '{}'", entry.path);
                        self.stats.entry_skipped();
                        continue;
                    }

                    if !self.emit(ScanEvent::Entry(entry)) {
                        return false;
                    }
                }
            }
        }

        self.finish_job()
    }

    /// Blocks until the event is queued, `false` if the session was cancelled
    /// or the iterator is gone.
    fn emit(&self, event: ScanEvent) -> bool {
        select! {
            send(self.results, event) -> result => result.is_ok(),
            recv(self.cancel.receiver()) -> _ => false,
        }
    }

    /// Marks one directory as done. The worker that completes the last
    /// outstanding directory shuts the pool down.
    fn finish_job(&self) -> bool {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            for _ in 0..self.parallelism {
                // Workers that already exited dropped their receivers.
                let _ = self.work.send(Job::Shutdown);
            }
        }

        true
    }
}
