//! Compaction Module
//!
//! Reclaims space held by stale records.
//!
//! ## Responsibilities
//! - Accept ids of files whose stale bytes crossed the threshold
//! - Copy the records that are still live into compaction output files
//! - Move each copied key in the index with compare-and-replace, so a
//!   concurrent put always wins over the copy
//! - Delete the source file once every live record has been moved
//!
//! ## Flow
//! ```text
//!   put / delete ──mark_stale──► CompactionQueue ──► worker thread
//!                                   (channel)           │
//!                                                       ├─ read source .index
//!                                                       ├─ transfer live records
//!                                                       │  into {id}.datac
//!                                                       ├─ index.replace(old, new)
//!                                                       └─ retire source file
//! ```
//!
//! Stopping is cooperative: the stop flag is raised and a `Stop` task wakes
//! an idle worker. The worker exits after the file it is working on,
//! flushing its output first; files still queued wait for the next worker.

mod rate_limiter;
mod worker;

pub use rate_limiter::RateLimiter;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};

use crate::engine::DbInner;
use crate::error::Result;

/// Message consumed by the compaction worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTask {
    /// Compact the data file with this id
    Compact(u32),
    /// Wake the worker so it notices a stop request
    Stop,
}

/// Lifecycle of the compaction worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
    Stopped,
    Running,
    Stopping,
}

/// Counters reported through `Engine::stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub files_compacted: u64,
    pub records_scanned: u64,
    pub bytes_scanned: u64,
    pub records_copied: u64,
    pub bytes_copied: u64,
    /// Copies whose index update succeeded
    pub records_replaced: u64,
    /// Copies that lost the compare-and-replace to a concurrent put
    pub lost_races: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    files_compacted: AtomicU64,
    records_scanned: AtomicU64,
    bytes_scanned: AtomicU64,
    records_copied: AtomicU64,
    bytes_copied: AtomicU64,
    records_replaced: AtomicU64,
    lost_races: AtomicU64,
}

impl Counters {
    pub fn scanned(&self, bytes: u64) {
        self.records_scanned.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn copied(&self, bytes: u64) {
        self.records_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn replaced(&self) {
        self.records_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lost_race(&self) {
        self.lost_races.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_compacted(&self) {
        self.files_compacted.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CompactionStats {
        CompactionStats {
            files_compacted: self.files_compacted.load(Ordering::Relaxed),
            records_scanned: self.records_scanned.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            records_copied: self.records_copied.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            records_replaced: self.records_replaced.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.files_compacted,
            &self.records_scanned,
            &self.bytes_scanned,
            &self.records_copied,
            &self.bytes_copied,
            &self.records_replaced,
            &self.lost_races,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Queue
// =============================================================================

/// FIFO of file ids waiting for compaction, shared by producers (the write
/// path) and the single worker
pub struct CompactionQueue {
    tx: Sender<CompactionTask>,
    rx: Receiver<CompactionTask>,

    /// Id of the file the worker is currently writing into (0 = none)
    current_output: AtomicU32,

    /// Files queued or being compacted
    pending: AtomicUsize,

    /// Set after a fatal I/O error; no more work is accepted
    halted: AtomicBool,

    stop_requested: AtomicBool,

    pub(crate) counters: Counters,
}

impl CompactionQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            current_output: AtomicU32::new(0),
            pending: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Queue a file; false if compaction has been halted
    pub fn submit(&self, file_id: u32) -> bool {
        if self.is_halted() {
            return false;
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(CompactionTask::Compact(file_id)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }

        tracing::debug!(file_id, "queued file for compaction");
        true
    }

    /// Ask the worker to exit after its current file
    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // the queue owns the receiver, so the channel can't be disconnected
        let _ = self.tx.send(CompactionTask::Stop);
    }

    pub(crate) fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn receiver(&self) -> &Receiver<CompactionTask> {
        &self.rx
    }

    /// Called by the worker once a queued file has been dealt with
    pub(crate) fn task_done(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current_output(&self) -> u32 {
        self.current_output.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current_output(&self, file_id: u32) {
        self.current_output.store(file_id, Ordering::SeqCst);
    }

    /// Files queued or in progress
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Stop accepting work and drop everything still queued
    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        for task in self.rx.try_iter() {
            if let CompactionTask::Compact(file_id) = task {
                tracing::debug!(file_id, "dropping queued compaction after halt");
                self.task_done();
            }
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CompactionStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}

impl Default for CompactionQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Starts and stops the background worker for one database
pub(crate) struct CompactionManager {
    db: Arc<DbInner>,
    worker: Option<JoinHandle<()>>,
    state: CompactionState,
}

impl CompactionManager {
    pub fn new(db: Arc<DbInner>) -> Self {
        Self {
            db,
            worker: None,
            state: CompactionState::Stopped,
        }
    }

    /// A worker that exited on its own (I/O halt) reports `Stopped`
    pub fn state(&self) -> CompactionState {
        match &self.worker {
            Some(handle) if handle.is_finished() => CompactionState::Stopped,
            _ => self.state,
        }
    }

    /// Spawn the worker; false if it is already running or compaction was
    /// halted by an I/O error
    pub fn start(&mut self) -> Result<bool> {
        if self.state != CompactionState::Stopped || self.db.compaction.is_halted() {
            return Ok(false);
        }

        self.db.compaction.clear_stop();
        self.worker = Some(worker::spawn(Arc::clone(&self.db))?);
        self.state = CompactionState::Running;
        tracing::info!(
            rate_bytes_per_sec = self.db.config.compaction_job_rate_bytes_per_sec,
            "compaction started"
        );
        Ok(true)
    }

    /// Ask the worker to finish its current file and exit, then wait for it
    pub fn stop(&mut self) {
        let handle = match self.worker.take() {
            Some(handle) => handle,
            None => return,
        };

        self.state = CompactionState::Stopping;
        self.db.compaction.request_stop();
        if handle.join().is_err() {
            tracing::error!("compaction thread terminated abnormally");
        }

        self.state = CompactionState::Stopped;
        tracing::info!("compaction stopped");
    }
}

impl Drop for CompactionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
