//! Pull based iteration over scanned entries.
//!

use core::mem;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, bounded};
use tracing::error;

use crate::{BackupError, CancelToken, entry::FileInfo};

/// A message from the scanner workers to the iterator.
#[derive(Debug)]
pub(crate) enum ScanEvent {
    Entry(FileInfo),
    Fatal(BackupError),
}

/// The observable state of an [`EntryIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// `advance` was not called yet.
    Created,

    /// The last `advance` produced an entry.
    Active,

    /// Every entry was produced.
    Exhausted,

    /// The scan ended with an error.
    Errored,
}

#[derive(Debug)]
enum State {
    Created,
    Active,
    Exhausted,
    Errored(BackupError),
}

/// A single-consumer, lazily produced sequence of entries.
///
/// Once the iterator is exhausted or errored it stays in that state for all
/// further calls. Dropping an unfinished iterator cancels the session and
/// waits for the scanner workers to exit.
#[derive(Debug)]
pub struct EntryIterator {
    events: Receiver<ScanEvent>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelToken,
    state: State,
    current: Option<FileInfo>,
}

impl EntryIterator {
    pub(crate) fn new(
        events: Receiver<ScanEvent>,
        workers: Vec<JoinHandle<()>>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            events,
            workers,
            cancel,
            state: State::Created,
            current: None,
        }
    }

    /// An iterator over entries that are already known.
    pub fn from_entries(entries: Vec<FileInfo>, cancel: CancelToken) -> Self {
        let (sender, receiver) = bounded(entries.len());
        for entry in entries {
            // The receiver is alive and the channel is large enough.
            let _ = sender.send(ScanEvent::Entry(entry));
        }
        drop(sender);

        Self::new(receiver, Vec::new(), cancel)
    }

    /// Advance to the next entry, `false` once exhausted or errored.
    pub fn advance(&mut self) -> bool {
        if matches!(self.state, State::Exhausted | State::Errored(_)) {
            self.current = None;
            return false;
        }

        match self.events.recv() {
            Ok(ScanEvent::Entry(entry)) => {
                self.current = Some(entry);
                self.state = State::Active;
                true
            }

            Ok(ScanEvent::Fatal(fatal)) => {
                error!("Scan failed: {fatal}");
                self.current = None;
                self.state = State::Errored(fatal);
                // Stop the remaining workers and any pending retries.
                self.cancel.cancel();
                self.join_workers();
                false
            }

            // Every worker exited.
            Err(_) => {
                self.current = None;
                self.state = if self.cancel.is_cancelled() {
                    State::Errored(BackupError::Cancelled)
                } else {
                    State::Exhausted
                };
                self.join_workers();
                false
            }
        }
    }

    /// The entry produced by the last successful `advance`.
    pub fn at(&self) -> Option<&FileInfo> {
        self.current.as_ref()
    }

    /// Take ownership of the entry produced by the last successful `advance`.
    pub fn take(&mut self) -> Option<FileInfo> {
        self.current.take()
    }

    /// The terminal error, if the scan failed.
    pub fn error(&self) -> Option<&BackupError> {
        match &self.state {
            State::Errored(error) => Some(error),
            _ => None,
        }
    }

    /// The current state.
    pub fn state(&self) -> IteratorState {
        match self.state {
            State::Created => IteratorState::Created,
            State::Active => IteratorState::Active,
            State::Exhausted => IteratorState::Exhausted,
            State::Errored(_) => IteratorState::Errored,
        }
    }

    /// Consume the iterator, returning the terminal error if there was one.
    ///
    /// An iterator that is not yet exhausted is cancelled.
    pub fn finish(mut self) -> Result<(), BackupError> {
        if matches!(self.state, State::Created | State::Active) {
            self.cancel.cancel();
            self.join_workers();
            return Err(BackupError::Cancelled);
        }

        match mem::replace(&mut self.state, State::Exhausted) {
            State::Errored(error) => Err(error),
            _ => Ok(()),
        }
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("A scanner worker panicked");
            }
        }
    }
}

impl Drop for EntryIterator {
    fn drop(&mut self) {
        if matches!(self.state, State::Created | State::Active) {
            self.cancel.cancel();
        }
        self.join_workers();
    }
}
