//! Engine Module
//!
//! The storage engine that ties the file set, the in-memory index and
//! compaction together for one database directory.
//!
//! ## Responsibilities
//! - Open a directory: load `META`, repair after an unclean shutdown,
//!   rebuild the index and start compaction
//! - Serve put / get / delete and live-key iteration
//! - Account stale bytes per file and hand files to compaction
//! - Close cleanly: stop compaction, flush files, persist `META`
//!
//! ## Lifecycle
//! ```text
//!   Closed ──► Opening ──► (Repairing) ──► Open ──► Closing ──► Closed
//!                              ▲
//!                              └── META open flag or io-error flag set
//! ```
//!
//! ## Concurrency Model
//! - **Writes** (put/delete): serialized by the writer mutex, rollover included
//! - **Reads** (get/iter): lock-free with respect to writers; only the
//!   index shard lock and the read map's `RwLock` are taken
//! - **Compaction**: one background thread; moves keys with compare-and-replace

mod inner;
mod iter;
mod read;
mod rebuild;
mod repair;
mod stats;
mod write;

pub use inner::DbState;
pub use iter::EngineIterator;
pub use rebuild::RebuildSummary;
pub use repair::{repair_data_file, repair_latest_files, repair_tombstone_file, RepairReport};
pub use stats::Stats;
pub use write::MAX_KEY_LEN;

pub(crate) use inner::{DbInner, FilePair};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compaction::{CompactionManager, CompactionState};
use crate::config::Config;
use crate::error::{EmberError, Result};
use crate::storage::{list_tombstone_files, remove_leftover_repair_files, DbMetadata};

/// An open database
///
/// All methods take `&self`; an `Engine` can be shared across threads
/// behind an `Arc`.
pub struct Engine {
    inner: Arc<DbInner>,
    compaction: Mutex<CompactionManager>,
}

impl Engine {
    /// Open or create the database in `dir`
    ///
    /// On startup:
    /// 1. Create the directory and validate `META` against the config
    /// 2. Repair the newest files if the last run did not close cleanly
    /// 3. Mark the database open in `META`
    /// 4. Load data files and rebuild the index from index + tombstone files
    /// 5. Start compaction and queue files that are already stale enough
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let metadata = load_metadata(&dir, &config)?;
        let inner = DbInner::new(dir.clone(), config, metadata);
        tracing::info!(dir = %dir.display(), "opening database");

        let leftovers = remove_leftover_repair_files(&dir)?;
        if leftovers > 0 {
            tracing::warn!(files = leftovers, "removed scratch files of an interrupted repair");
        }

        if metadata.open || metadata.io_error {
            tracing::warn!(
                unclean_shutdown = metadata.open,
                io_error = metadata.io_error,
                "database was not closed cleanly, repairing"
            );
            inner.set_state(DbState::Repairing);
            let reports = repair_latest_files(&dir)?;
            tracing::info!(files = reports.len(), "repair finished");
        }

        let max_file_size = inner.config.max_file_size;
        inner.store_metadata(|m| {
            m.open = true;
            m.io_error = false;
            m.max_file_size = max_file_size;
        })?;

        inner.load_files()?;
        inner.sequence.observe(metadata.sequence_number);
        let summary = inner.rebuild_index()?;
        inner.sequence.observe(summary.max_sequence);
        tracing::info!(
            keys = inner.index.size(),
            data_files = inner.data_file_count(),
            index_entries = summary.index_entries,
            tombstones = summary.tombstones,
            "index rebuilt"
        );

        inner.set_state(DbState::Open);

        let inner = Arc::new(inner);
        let mut compaction = CompactionManager::new(Arc::clone(&inner));
        if !inner.config.compaction_disabled {
            compaction.start()?;
        }
        inner.schedule_stale_files();

        Ok(Self {
            inner,
            compaction: Mutex::new(compaction),
        })
    }

    /// Value stored under `key`, or `None`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    /// Remove `key`; a missing key is not an error
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    /// Number of live keys
    pub fn size(&self) -> u64 {
        self.inner.index.size()
    }

    /// Live records, see [`EngineIterator`]
    pub fn iter(&self) -> EngineIterator {
        EngineIterator::new(Arc::clone(&self.inner))
    }

    pub fn stats(&self) -> Stats {
        let tombstone_files = list_tombstone_files(&self.inner.dir)
            .map(|ids| ids.len())
            .unwrap_or(0);

        Stats {
            size: self.size(),
            index: self.inner.index.stats(),
            compaction: self.inner.compaction.stats(),
            pending_compaction_files: self.inner.compaction.pending(),
            stale_bytes_per_file: self.inner.stale_bytes().into_iter().collect::<BTreeMap<_, _>>(),
            data_files: self.inner.data_file_count(),
            tombstone_files,
            config: self.inner.config.clone(),
        }
    }

    pub fn reset_stats(&self) {
        self.inner.index.reset_stats();
        self.inner.compaction.reset_stats();
    }

    /// Stop the compaction worker after the file it is working on.
    /// Files keep being queued and are picked up on resume.
    pub fn pause_compaction(&self) {
        self.compaction.lock().stop();
    }

    /// Restart a paused worker; false if compaction is disabled, already
    /// running or halted by an I/O error
    pub fn resume_compaction(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        if self.inner.config.compaction_disabled {
            return Ok(false);
        }
        self.compaction.lock().start()
    }

    pub fn compaction_state(&self) -> CompactionState {
        self.compaction.lock().state()
    }

    /// True when no file is queued or being compacted
    pub fn is_compaction_idle(&self) -> bool {
        self.inner.compaction.is_idle()
    }

    pub fn state(&self) -> DbState {
        self.inner.state()
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Stop compaction, flush and close all files and mark the database
    /// closed in `META`. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.inner.begin_closing() {
            return Ok(());
        }
        tracing::info!(dir = %self.inner.dir.display(), "closing database");

        self.compaction.lock().stop();
        let closed = self.inner.close_writer();
        self.inner.release_files();

        if self.inner.config.clean_up_index_on_close {
            self.inner.index.clear();
        }

        // a writer that failed to flush leaves the open flag set so the
        // next open repairs
        let clean = closed.is_ok();
        let sequence = self.inner.sequence.last();
        let stored = self.inner.store_metadata(|m| {
            m.open = !clean;
            m.sequence_number = sequence;
        });

        self.inner.set_state(DbState::Closed);
        closed?;
        stored?;
        tracing::info!("database closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close database on drop");
        }
    }
}

/// Load `META`, or start a fresh one for a new directory
fn load_metadata(dir: &Path, config: &Config) -> Result<DbMetadata> {
    let metadata = DbMetadata::load(dir)?.unwrap_or_default();

    if metadata.version > DbMetadata::FORMAT_VERSION {
        return Err(EmberError::Corrupt(format!(
            "unsupported metadata version {}",
            metadata.version
        )));
    }

    if metadata.max_file_size != 0 && metadata.max_file_size != config.max_file_size {
        return Err(EmberError::Config(format!(
            "database was created with max_file_size {}, got {}",
            metadata.max_file_size, config.max_file_size
        )));
    }

    Ok(metadata)
}
