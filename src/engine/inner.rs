//! Shared engine state
//!
//! Everything the writer path, readers, iterators and the compaction worker
//! share lives here, owned by one database instance.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::compaction::CompactionQueue;
use crate::config::Config;
use crate::error::{EmberError, Result};
use crate::index::InMemoryIndex;
use crate::sequence::SequenceGenerator;
use crate::storage::{
    index_file_path, list_data_files, list_index_files, list_tombstone_files, DataFile,
    DbMetadata, FileKind, IndexFile, TombstoneFile,
};

/// Lifecycle of a database instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Closed,
    Opening,
    Repairing,
    Open,
    Closing,
}

/// A data file together with its index file, as written by one writer
pub(crate) struct FilePair {
    pub data: Arc<DataFile>,
    pub index: IndexFile,
}

impl FilePair {
    pub fn id(&self) -> u32 {
        self.data.id()
    }

    pub fn flush(&self) -> Result<()> {
        self.data.flush()?;
        self.index.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.data.close()?;
        self.index.close()
    }
}

/// Files currently being appended to by put / delete
#[derive(Default)]
pub(crate) struct WriterState {
    pub data: Option<FilePair>,
    pub tombstone: Option<TombstoneFile>,
}

pub(crate) struct DbInner {
    pub dir: PathBuf,
    pub config: Config,
    state: RwLock<DbState>,

    pub index: InMemoryIndex,

    /// Read map: file id → open data file. Shared by writer, compactor and
    /// readers; the compactor removes entries once a file is compacted.
    files: RwLock<HashMap<u32, Arc<DataFile>>>,

    /// Serializes the whole put / delete path, rollover included
    pub writer: Mutex<WriterState>,
    current_write_file: AtomicU32,
    next_file_id: AtomicU32,

    /// Advisory stale bytes per file id
    stale: Mutex<HashMap<u32, u64>>,

    pub sequence: SequenceGenerator,
    metadata: Mutex<DbMetadata>,

    pub compaction: CompactionQueue,
}

impl DbInner {
    pub fn new(dir: PathBuf, config: Config, metadata: DbMetadata) -> Self {
        let index = InMemoryIndex::new(config.index_shards, config.number_of_records);
        Self {
            dir,
            state: RwLock::new(DbState::Opening),
            index,
            files: RwLock::new(HashMap::new()),
            writer: Mutex::new(WriterState::default()),
            current_write_file: AtomicU32::new(0),
            next_file_id: AtomicU32::new(1),
            stale: Mutex::new(HashMap::new()),
            sequence: SequenceGenerator::new(),
            metadata: Mutex::new(metadata),
            compaction: CompactionQueue::new(),
            config,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn state(&self) -> DbState {
        *self.state.read()
    }

    pub fn set_state(&self, state: DbState) {
        *self.state.write() = state;
    }

    /// Move Open → Closing; false if the engine was not open
    pub fn begin_closing(&self) -> bool {
        let mut state = self.state.write();
        if *state == DbState::Open {
            *state = DbState::Closing;
            true
        } else {
            false
        }
    }

    pub fn ensure_open(&self) -> Result<()> {
        match self.state() {
            DbState::Open => Ok(()),
            DbState::Closing => Err(EmberError::EngineClosing),
            _ => Err(EmberError::NotOpen),
        }
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.state(), DbState::Closing | DbState::Closed)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn store_metadata(&self, update: impl FnOnce(&mut DbMetadata)) -> Result<()> {
        let mut metadata = self.metadata.lock();
        update(&mut metadata);
        metadata.store(&self.dir)
    }

    /// Persist the io-error flag so the next open runs repair
    pub fn set_io_error(&self) {
        if let Err(e) = self.store_metadata(|m| m.io_error = true) {
            tracing::error!(error = %e, "failed to persist io-error flag");
        }
    }

    /// Pass `err` through, recording it first if it is a fatal I/O error
    pub fn fatal(&self, err: EmberError) -> EmberError {
        if err.is_io() {
            tracing::error!(error = %err, "fatal I/O error");
            self.set_io_error();
        }
        err
    }

    // =========================================================================
    // File Set
    // =========================================================================

    /// Open every data file in the directory into the read map and set the
    /// next file id above anything on disk
    pub fn load_files(&self) -> Result<()> {
        let policy = self.config.flush_policy;
        let mut max_id = 0;

        let mut files = self.files.write();
        for (id, kind) in list_data_files(&self.dir)? {
            files.insert(id, Arc::new(DataFile::open(&self.dir, id, kind, policy)?));
            max_id = max_id.max(id);
        }
        drop(files);

        for id in list_index_files(&self.dir)?
            .into_iter()
            .chain(list_tombstone_files(&self.dir)?)
        {
            max_id = max_id.max(id);
        }

        self.next_file_id.store(max_id + 1, Ordering::SeqCst);
        Ok(())
    }

    pub fn allocate_file_id(&self) -> u32 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn data_file(&self, id: u32) -> Option<Arc<DataFile>> {
        self.files.read().get(&id).cloned()
    }

    /// Ids of all data files, oldest first
    pub fn data_file_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.files.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn data_file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Create a data + index file pair with a fresh id and publish the data
    /// file in the read map
    pub fn create_file_pair(&self, kind: FileKind) -> Result<FilePair> {
        let id = self.allocate_file_id();
        let policy = self.config.flush_policy;

        let data = Arc::new(DataFile::create(&self.dir, id, kind, policy)?);
        let index = IndexFile::create(&self.dir, id, policy)?;
        self.files.write().insert(id, Arc::clone(&data));

        tracing::debug!(file_id = id, ?kind, "created data file");
        Ok(FilePair { data, index })
    }

    pub fn current_write_file(&self) -> u32 {
        self.current_write_file.load(Ordering::SeqCst)
    }

    pub fn set_current_write_file(&self, id: u32) {
        self.current_write_file.store(id, Ordering::SeqCst);
    }

    /// Drop the read map's handles (close path)
    pub fn release_files(&self) {
        self.files.write().clear();
    }

    /// Remove a fully compacted file from the read map and from disk
    pub fn retire_file(&self, id: u32) -> Result<()> {
        let removed = self.files.write().remove(&id);
        if let Some(file) = removed {
            file.delete()?;
        }
        remove_if_exists(&index_file_path(&self.dir, id))?;
        self.stale.lock().remove(&id);
        Ok(())
    }

    // =========================================================================
    // Stale Accounting
    // =========================================================================

    /// Credit stale bytes without scheduling anything (used by rebuild)
    pub fn add_stale(&self, file_id: u32, bytes: u64) {
        *self.stale.lock().entry(file_id).or_insert(0) += bytes;
    }

    /// Credit stale bytes and queue the file once it crosses the threshold
    pub fn mark_stale(&self, file_id: u32, bytes: u64) {
        let mut stale = self.stale.lock();
        // retire_file drops the file before its stale entry
        if !self.files.read().contains_key(&file_id) {
            return;
        }
        let total = stale.entry(file_id).or_insert(0);
        *total += bytes;

        if *total >= self.config.stale_threshold_bytes() && self.submit_for_compaction(file_id) {
            stale.remove(&file_id);
        }
    }

    /// Queue every file already past the threshold (after rebuild)
    pub fn schedule_stale_files(&self) {
        let threshold = self.config.stale_threshold_bytes();
        let mut stale = self.stale.lock();
        let ready: Vec<u32> = stale
            .iter()
            .filter(|&(_, &bytes)| bytes >= threshold)
            .map(|(&id, _)| id)
            .collect();

        for id in ready {
            if self.submit_for_compaction(id) {
                stale.remove(&id);
            }
        }
    }

    fn submit_for_compaction(&self, file_id: u32) -> bool {
        if self.config.compaction_disabled
            || file_id == self.current_write_file()
            || file_id == self.compaction.current_output()
        {
            return false;
        }
        self.compaction.submit(file_id)
    }

    pub fn stale_bytes(&self) -> HashMap<u32, u64> {
        self.stale.lock().clone()
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
