//! Drains scanned entries into size-bounded pack files.
//!
//! Entries are packed greedily in arrival order. When the next entry would
//! push a non-empty pack past the limit the pack is closed and the next
//! sequence number is opened. An entry larger than the limit is written alone
//! into its own pack file and flagged oversized.
//!

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
    BackupError, CancelToken,
    config::Config,
    connection::ConnectionManager,
    entry::FileInfo,
    index::{IndexEntry, IndexWriter},
    iterator::EntryIterator,
    repository::SessionLayout,
    session::{SessionCounters, SessionStats},
};

/// Size limits for the archive files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackLimits {
    /// Desired size of a single pack file in bytes.
    pub pack_file_size_limit: u64,

    /// Desired size of a single index file in bytes.
    pub index_file_size_limit: u64,
}

impl PackLimits {
    /// The limits configured in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            pack_file_size_limit: config.pack_file_size_limit,
            index_file_size_limit: config.index_file_size_limit,
        }
    }
}

#[derive(Debug)]
struct OpenPack {
    sequence: u64,
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    entries: u64,
}

/// Writes the pack and index files of one session.
pub struct PackWriter {
    connection: Arc<ConnectionManager>,
    layout: SessionLayout,
    limits: PackLimits,
    stats: Arc<SessionStats>,
    cancel: CancelToken,

    open: Option<OpenPack>,
    next_sequence: u64,
    index: IndexWriter,
    seen: HashSet<String>,
    pack_files: Vec<PathBuf>,
}

impl PackWriter {
    #[allow(missing_docs)]
    pub fn new(
        connection: Arc<ConnectionManager>,
        layout: SessionLayout,
        limits: PackLimits,
        stats: Arc<SessionStats>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            connection,
            layout,
            index: IndexWriter::new(limits.index_file_size_limit),
            limits,
            stats,
            cancel,
            open: None,
            next_sequence: 0,
            seen: HashSet::new(),
            pack_files: Vec::new(),
        }
    }

    /// Packs every entry the iterator produces.
    ///
    /// The open pack file and the index buffer are always flushed, also when
    /// packing stops early. Files written before a failure are left in place.
    pub fn pack(&mut self, mut entries: EntryIterator) -> Result<SessionCounters, BackupError> {
        let packed = self.pack_entries(&mut entries);
        if packed.is_err() {
            self.cancel.cancel();
        }

        let closed = match self.open.take() {
            Some(pack) => self.close(pack),
            None => Ok(()),
        };
        let flushed = self.flush_index();

        let scanned = entries.finish();

        match (packed.and(closed).and(flushed), scanned) {
            (Ok(()), Ok(())) => {
                let counters = self.stats.snapshot();
                info!(
                    "Packed {} entries ({} bytes) into {} pack files and {} index files",
                    counters.entries_packed,
                    counters.bytes_packed,
                    counters.pack_files,
                    counters.index_files
                );
                Ok(counters)
            }

            // The scan failure is what cancelled the packing.
            (Ok(()) | Err(BackupError::Cancelled), Err(error)) => Err(error),

            (Err(error), _) => Err(error),
        }
    }

    /// Pack files closed so far.
    pub fn pack_files(&self) -> &[PathBuf] {
        &self.pack_files
    }

    /// Index files written so far.
    pub fn index_files(&self) -> &[PathBuf] {
        self.index.written()
    }

    fn pack_entries(&mut self, entries: &mut EntryIterator) -> Result<(), BackupError> {
        while entries.advance() {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let Some(entry) = entries.take() else {
                continue;
            };

            if !self.seen.insert(entry.path.clone()) {
                warn!("Skipping '{}', it was already packed", entry.path);
                self.stats.entry_skipped();
                continue;
            }

            let content = match self.connection.get(&entry.path) {
                Ok(content) => content,
                Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
                Err(BackupError::NotFound { path }) => {
                    warn!("Skipping '{path}', it no longer exists");
                    self.stats.entry_skipped();
                    continue;
                }
                Err(error) => {
                    warn!("Skipping '{}': {error}", entry.path);
                    self.stats.entry_failed();
                    continue;
                }
            };

            self.write_entry(&entry, &content)?;
        }

        Ok(())
    }

    fn write_entry(&mut self, entry: &FileInfo, content: &[u8]) -> Result<(), BackupError> {
        let length = u64::try_from(content.len()).unwrap_or(u64::MAX);
        let limit = self.limits.pack_file_size_limit;
        let oversized = length > limit;

        let mut pack = match self.open.take() {
            Some(pack) if pack.entries > 0 && pack.offset.saturating_add(length) > limit => {
                self.close(pack)?;
                self.open_pack()?
            }
            Some(pack) => pack,
            None => self.open_pack()?,
        };

        let offset = pack.offset;
        pack.writer
            .write_all(content)
            .map_err(|e| BackupError::pack_write("write pack file", &pack.path, e))?;
        pack.offset += length;
        pack.entries += 1;

        let record = IndexEntry {
            path: entry.path.clone(),
            pack: pack.sequence,
            offset,
            length,
            modified: entry.modified,
            oversized,
        };

        if oversized {
            warn!(
                "'{}' is larger than the pack file size limit ({length} > {limit} bytes), packed alone",
                entry.path
            );
            self.close(pack)?;
        } else {
            self.open = Some(pack);
        }

        if self.index.push(&record, &self.layout)?.is_some() {
            self.stats.index_file_written();
        }

        self.stats.entry_packed(length);

        Ok(())
    }

    fn open_pack(&mut self) -> Result<OpenPack, BackupError> {
        let sequence = self.next_sequence;
        let path = self.layout.pack_path(sequence);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| BackupError::pack_write("create pack file", &path, e))?;

        self.next_sequence += 1;

        Ok(OpenPack {
            sequence,
            path,
            writer: BufWriter::new(file),
            offset: 0,
            entries: 0,
        })
    }

    fn close(&mut self, pack: OpenPack) -> Result<(), BackupError> {
        let OpenPack {
            path,
            writer,
            offset,
            entries,
            ..
        } = pack;

        let file = writer
            .into_inner()
            .map_err(|e| BackupError::pack_write("flush pack file", &path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| BackupError::pack_write("sync pack file", &path, e))?;

        debug!("Closed pack file {path:?} ({entries} entries, {offset} bytes)");

        self.stats.pack_file_written();
        self.pack_files.push(path);

        Ok(())
    }

    fn flush_index(&mut self) -> Result<(), BackupError> {
        if self.index.flush(&self.layout)?.is_some() {
            self.stats.index_file_written();
        }

        Ok(())
    }
}
