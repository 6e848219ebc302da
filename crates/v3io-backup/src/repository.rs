//! On-disk layout of the backup repository.
//!
//! ```text
//! <repository>/
//!     history.json
//!     2024-05-01_10-00-00/
//!         session.json
//!         packs/pack-000000.pack
//!         index/index-000000.jsonl
//! ```
//!

use std::{
    collections::{HashMap, HashSet},
    fs::{self, File},
    io::{self, ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    BackupError,
    index::{IndexEntry, ReadIndexError, read_index_file},
    session::BackupSession,
};

const PACK_DIRECTORY: &str = "packs";
const INDEX_DIRECTORY: &str = "index";
const SESSION_FILE: &str = "session.json";
const FILE_SCHEME: &str = "file://";

/// The target repository, a local directory.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Opens the repository, creating its directory if needed.
    ///
    /// Accepts a plain path or a `file://` URL.
    pub fn open(identifier: &str) -> Result<Self, BackupError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(BackupError::Config(
                "the target repository must be set".to_string(),
            ));
        }

        let root = match identifier.strip_prefix(FILE_SCHEME) {
            Some(path) => PathBuf::from(path),
            None if identifier.contains("://") => {
                return Err(BackupError::Config(format!(
                    "unsupported repository '{identifier}', expected a path or a file:// URL"
                )));
            }
            None => PathBuf::from(identifier),
        };

        fs::create_dir_all(&root)
            .map_err(|e| BackupError::pack_write("create repository", &root, e))?;

        Ok(Self { root })
    }

    /// The repository directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory for a new session.
    pub fn create_session(&self, started_at: DateTime<Utc>) -> Result<SessionLayout, BackupError> {
        let directory = self
            .root
            .join(started_at.format("%Y-%m-%d_%H-%M-%S").to_string());

        fs::create_dir(&directory).map_err(|e| {
            let action = if e.kind() == ErrorKind::AlreadyExists {
                "create session directory, it already exists,"
            } else {
                "create session directory"
            };
            BackupError::pack_write(action, &directory, e)
        })?;

        let layout = SessionLayout::open(directory);
        for sub_directory in [PACK_DIRECTORY, INDEX_DIRECTORY] {
            let path = layout.directory.join(sub_directory);
            fs::create_dir(&path)
                .map_err(|e| BackupError::pack_write("create session directory", &path, e))?;
        }

        Ok(layout)
    }

    /// Every session directory in the repository, oldest first.
    pub fn sessions(&self) -> Result<Vec<SessionLayout>, ReadSessionError> {
        let read_dir = fs::read_dir(&self.root).map_err(|source| ReadSessionError::Io {
            action: "list repository",
            path: self.root.clone(),
            source,
        })?;

        let mut sessions: Vec<SessionLayout> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.join(SESSION_FILE).is_file())
            .map(SessionLayout::open)
            .collect();

        sessions.sort_by(|a, b| a.directory.cmp(&b.directory));

        Ok(sessions)
    }
}

/// The files of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    directory: PathBuf,
}

impl SessionLayout {
    /// The layout of an existing session directory.
    pub fn open(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The session directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The path of the pack file with the given sequence number.
    pub fn pack_path(&self, sequence: u64) -> PathBuf {
        self.directory
            .join(PACK_DIRECTORY)
            .join(format!("pack-{sequence:06}.pack"))
    }

    /// The path of the index file with the given sequence number.
    pub fn index_path(&self, sequence: u64) -> PathBuf {
        self.directory
            .join(INDEX_DIRECTORY)
            .join(format!("index-{sequence:06}.jsonl"))
    }

    /// The path of the session summary.
    pub fn session_path(&self) -> PathBuf {
        self.directory.join(SESSION_FILE)
    }

    /// `path` relative to the session directory.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.directory)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Writes the session summary.
    pub fn write_session(&self, session: &BackupSession) -> Result<(), BackupError> {
        let path = self.session_path();
        let contents = serde_json::to_string_pretty(session).map_err(|source| {
            BackupError::SerializeIndex {
                path: SESSION_FILE.to_string(),
                source,
            }
        })?;

        fs::write(&path, contents).map_err(|e| BackupError::pack_write("write session", &path, e))
    }

    /// Reads the session summary.
    pub fn read_session(&self) -> Result<BackupSession, ReadSessionError> {
        let path = self.session_path();
        let contents = fs::read_to_string(&path).map_err(|source| ReadSessionError::Io {
            action: "read session",
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ReadSessionError::Session { path, source })
    }

    /// The index files of the session in sequence order.
    pub fn index_files(&self) -> Result<Vec<PathBuf>, ReadSessionError> {
        let directory = self.directory.join(INDEX_DIRECTORY);
        let read_dir = fs::read_dir(&directory).map_err(|source| ReadSessionError::Io {
            action: "list index files in",
            path: directory.clone(),
            source,
        })?;

        let mut files: Vec<PathBuf> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|extension| extension == "jsonl"))
            .collect();
        files.sort();

        Ok(files)
    }

    /// Every index record of the session.
    pub fn load_index(&self) -> Result<Vec<IndexEntry>, ReadSessionError> {
        let mut entries = Vec::new();
        for file in self.index_files()? {
            entries.extend(read_index_file(&file)?);
        }

        Ok(entries)
    }

    /// Reads the packed content of one entry.
    pub fn read_entry(&self, entry: &IndexEntry) -> Result<Vec<u8>, ReadSessionError> {
        let path = self.pack_path(entry.pack);
        let io_error = |source: io::Error| ReadSessionError::Io {
            action: "read pack file",
            path: path.clone(),
            source,
        };

        let length = usize::try_from(entry.length)
            .map_err(|_| ReadSessionError::TooLarge(entry.path.clone()))?;

        let mut file = File::open(&path).map_err(io_error)?;
        file.seek(SeekFrom::Start(entry.offset)).map_err(io_error)?;

        let mut content = vec![0u8; length];
        file.read_exact(&mut content).map_err(io_error)?;

        Ok(content)
    }

    /// Checks every index range against its pack file and every pack file
    /// against the recorded limit.
    pub fn verify(&self) -> Result<VerifyReport, ReadSessionError> {
        let session = self.read_session()?;
        let entries = self.load_index()?;

        let mut problems = Vec::new();
        let mut paths = HashSet::new();
        let mut pack_sizes: HashMap<u64, Option<u64>> = HashMap::new();
        let mut pack_entries: HashMap<u64, Vec<&IndexEntry>> = HashMap::new();

        for entry in &entries {
            if !paths.insert(entry.path.as_str()) {
                problems.push(format!("'{}' is indexed more than once", entry.path));
            }

            let pack_size = *pack_sizes.entry(entry.pack).or_insert_with(|| {
                fs::metadata(self.pack_path(entry.pack))
                    .ok()
                    .map(|metadata| metadata.len())
            });

            match pack_size {
                None => problems.push(format!(
                    "'{}' references missing pack {}",
                    entry.path, entry.pack
                )),
                Some(size) if entry.offset.saturating_add(entry.length) > size => {
                    problems.push(format!(
                        "'{}' range {}+{} exceeds pack {} of {size} bytes",
                        entry.path, entry.offset, entry.length, entry.pack
                    ));
                }
                Some(_) => {}
            }

            pack_entries.entry(entry.pack).or_default().push(entry);
        }

        for (pack, members) in &pack_entries {
            let occupied: u64 = members.iter().map(|entry| entry.length).sum();
            let single_oversized = members.len() == 1 && members.iter().all(|entry| entry.oversized);

            if occupied > session.pack_file_size_limit && !single_oversized {
                problems.push(format!(
                    "pack {pack} holds {occupied} bytes, above the limit of {}",
                    session.pack_file_size_limit
                ));
            }
        }

        Ok(VerifyReport {
            entries: entries.len(),
            problems,
        })
    }
}

/// The outcome of [`SessionLayout::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of index records checked.
    pub entries: usize,

    /// Every inconsistency found.
    pub problems: Vec<String>,
}

impl VerifyReport {
    /// Whether no problem was found.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ReadSessionError {
    #[error("Failed to {action} {path:?}:\n{source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid session file {path:?}:\n{source}")]
    Session {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Index(#[from] ReadIndexError),

    #[error("Entry '{0}' is too large to read into memory")]
    TooLarge(String),
}
