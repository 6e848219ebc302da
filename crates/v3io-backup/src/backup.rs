//! One backup invocation.
//!
//! Validates the configuration, connects, scans, packs and records the
//! session summary. The summary is written for failed sessions too so the
//! partial archive can be inspected.
//!

use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    BackupError, CancelToken, ErrorKind,
    config::Config,
    connection::ConnectionManager,
    container::{self, Container},
    history::History,
    pack::{PackLimits, PackWriter},
    repository::{Repository, SessionLayout},
    scanner::{ScanRequest, Scanner},
    session::{BackupSession, SessionCounters, SessionStats},
};

/// Exit code of a successful session.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code of a session that ended with a fatal error.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for invalid configuration.
pub const EXIT_CONFIG: i32 = 2;

/// Exit code of a strict session with skipped subtrees or failed entries.
pub const EXIT_STRICT_FAILURE: i32 = 3;

/// The outcome of a session that ran to completion.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// The persisted session summary.
    pub session: BackupSession,

    /// Where the session was written.
    pub layout: SessionLayout,

    /// Whether subtree and entry failures fail the session.
    pub strict: bool,
}

impl SessionReport {
    /// The final counters.
    pub fn counters(&self) -> SessionCounters {
        self.session.counters
    }

    /// Whether the session counts as successful.
    pub fn succeeded(&self) -> bool {
        !(self.strict && self.session.counters.has_failures())
    }

    /// The process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            EXIT_SUCCESS
        } else {
            EXIT_STRICT_FAILURE
        }
    }
}

/// A session that ended with a fatal error.
#[derive(Debug, Error)]
#[error("Backup failed ({kind}): {error}", kind = .error.kind())]
pub struct SessionFailure {
    /// The error that ended the session.
    #[source]
    pub error: BackupError,

    /// The counters at the time of the failure.
    pub counters: SessionCounters,

    /// The session directory, if it was created.
    pub session_directory: Option<PathBuf>,
}

impl SessionFailure {
    fn new(error: BackupError) -> Self {
        Self {
            error,
            counters: SessionCounters::default(),
            session_directory: None,
        }
    }

    /// The process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self.error.kind() {
            ErrorKind::Config => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<BackupError> for SessionFailure {
    fn from(error: BackupError) -> Self {
        Self::new(error)
    }
}

/// Runs one backup session against the container named by the configuration.
pub fn run(config: &Config, cancel: CancelToken) -> Result<SessionReport, SessionFailure> {
    config.validate()?;
    let container = container::open(config)?;

    run_with_container(config, container, cancel)
}

/// Runs one backup session against the given container client.
pub fn run_with_container(
    config: &Config,
    container: Box<dyn Container>,
    cancel: CancelToken,
) -> Result<SessionReport, SessionFailure> {
    config.validate()?;

    let options = &config.backup;
    if options.repository.trim().is_empty() {
        return Err(BackupError::Config("the target repository must be set".to_string()).into());
    }

    let request = ScanRequest::new(&options.paths, &options.exclude_filters, None)?;
    let repository = Repository::open(&options.repository)?;

    let history_key = History::key(&config.container, request.paths());
    let mut history = match History::load_or_create_file(repository.root()) {
        Ok(history) => Some(history),
        Err(error) => {
            warn!("Could not load backup history, it will not be updated: {error}");
            None
        }
    };

    let cutoff = match options.modified_after {
        Some(cutoff) => Some(cutoff),
        None if options.incremental => {
            let last_success = history
                .as_ref()
                .and_then(|history| history.last_success(&history_key));
            match last_success {
                Some(cutoff) => info!("Incremental backup of entries modified after {cutoff}"),
                None => info!("No previous successful backup, running a full backup"),
            }
            last_success
        }
        None => None,
    };
    let request = request.with_modified_after(cutoff);

    let started_at = Utc::now();
    let stats = Arc::new(SessionStats::default());
    let connection = Arc::new(ConnectionManager::new(config, container, cancel.clone()));
    let connected = Connected(Arc::clone(&connection));

    if let Some(root) = request.paths().first() {
        match connection.connect(root) {
            Ok(()) => {}
            Err(BackupError::NotFound { path }) => {
                warn!("'{path}' does not exist, continuing with the remaining paths");
            }
            Err(error @ BackupError::Transient { .. }) => {
                warn!("Connected, but the first path could not be listed: {error}");
            }
            Err(error) => return Err(error.into()),
        }
    }

    let layout = repository.create_session(started_at)?;
    info!("Backing up {:?} into {:?}", request.paths(), layout.directory());

    let mut writer = PackWriter::new(
        Arc::clone(&connection),
        layout.clone(),
        PackLimits::from_config(config),
        Arc::clone(&stats),
        cancel.clone(),
    );

    let scanner = Scanner::new(
        Arc::clone(&connection),
        config.scanner_parallelism,
        Arc::clone(&stats),
        cancel,
    );

    let mut result = scanner
        .scan(&request)
        .and_then(|entries| writer.pack(entries).map(|_| ()));

    drop(scanner);
    drop(connected);

    let session = BackupSession {
        repository: repository.root().to_string_lossy().into_owned(),
        endpoint: config.normalised_endpoint(),
        container: config.container.clone(),
        paths: request.paths().to_vec(),
        exclude_filters: request.filter().patterns(),
        modified_after: cutoff,
        pack_file_size_limit: config.pack_file_size_limit,
        index_file_size_limit: config.index_file_size_limit,
        started_at,
        finished_at: Some(Utc::now()),
        counters: stats.snapshot(),
        pack_files: relative_paths(&layout, writer.pack_files()),
        index_files: relative_paths(&layout, writer.index_files()),
        error: result.as_ref().err().map(ToString::to_string),
    };

    if let Err(write_error) = layout.write_session(&session) {
        error!("Could not write the session summary: {write_error}");
        if result.is_ok() {
            result = Err(write_error);
        }
    }

    log_summary(&session);

    if let Err(error) = result {
        return Err(SessionFailure {
            error,
            counters: session.counters,
            session_directory: Some(layout.directory().to_path_buf()),
        });
    }

    let report = SessionReport {
        session,
        layout,
        strict: options.strict,
    };

    if !report.succeeded() {
        error!("Strict mode: subtrees or entries failed, the session is marked as failed");
    }

    if !report.session.counters.has_failures() {
        if let Some(history) = history.as_mut() {
            if let Err(error) = history.update(history_key, started_at) {
                warn!("Could not update backup history: {error}");
            }
        }
    }

    Ok(report)
}

/// Disconnects when dropped.
struct Connected(Arc<ConnectionManager>);

impl Drop for Connected {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}

fn relative_paths(layout: &SessionLayout, paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|path| layout.relative(path)).collect()
}

fn log_summary(session: &BackupSession) {
    let counters = &session.counters;
    info!(
        "Scanned {}, packed {} ({} bytes), skipped {}, failed {}, missing subtrees {}, failed subtrees {}",
        counters.entries_scanned,
        counters.entries_packed,
        counters.bytes_packed,
        counters.entries_skipped,
        counters.entries_failed,
        counters.subtrees_missing,
        counters.subtrees_failed
    );

    if let Some(error) = &session.error {
        error!("Session ended with an error: {error}");
    }
}
