//! Storage Module
//!
//! Append-only files that make up a database directory.
//!
//! ## Responsibilities
//! - Append encoded records / index entries / tombstones and track the
//!   write offset in memory
//! - fsync according to the configured flush policy, and always on
//!   rollover and close
//! - Sequential iteration that stops at the first torn or corrupt frame
//! - Positioned value reads and file-to-file transfer for compaction
//! - Enumerating files in a directory, oldest first
//! - Persisting the `META` witness record atomically
//!
//! ## Directory Layout
//! ```text
//! {dir}/
//!   ├── 1.data          (records written by put)
//!   ├── 1.index         (one index entry per record in 1.data)
//!   ├── 2.datac         (records rewritten by compaction)
//!   ├── 2.index
//!   ├── 3.tombstone     (deletion markers)
//!   └── META            (open flag, io-error flag, sequence, max file size)
//! ```

mod append;
mod data_file;
mod index_file;
mod iter;
mod layout;
mod metadata;
mod tombstone_file;

pub use data_file::DataFile;
pub use index_file::IndexFile;
pub use iter::{Frame, FrameIter, TailState};
pub use layout::{
    data_file_path, index_file_path, list_data_files, list_index_files, list_tombstone_files,
    remove_leftover_repair_files, repair_path, sync_dir, tombstone_file_path, FileKind,
    META_FILENAME,
};
pub use metadata::DbMetadata;
pub use tombstone_file::TombstoneFile;

use crate::config::FlushPolicy;

// =============================================================================
// Flush Tracking
// =============================================================================

/// Counts bytes appended since the last fsync and decides when to flush
#[derive(Debug, Clone, Copy)]
pub struct FlushTracker {
    policy: FlushPolicy,
    unflushed: u64,
}

impl FlushTracker {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            unflushed: 0,
        }
    }

    /// Account for `bytes` appended; true if a flush is due now
    pub fn record(&mut self, bytes: u64) -> bool {
        self.unflushed += bytes;
        match self.policy {
            FlushPolicy::OsDeferred => false,
            FlushPolicy::EveryNBytes { bytes: limit } => self.unflushed >= limit,
        }
    }

    /// Bytes written since the last flush
    pub fn unflushed(&self) -> u64 {
        self.unflushed
    }

    pub fn reset(&mut self) {
        self.unflushed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_deferred_never_asks_for_flush() {
        let mut tracker = FlushTracker::new(FlushPolicy::OsDeferred);
        assert!(!tracker.record(u64::MAX / 2));
        assert_eq!(tracker.unflushed(), u64::MAX / 2);
    }

    #[test]
    fn test_every_n_bytes() {
        let mut tracker = FlushTracker::new(FlushPolicy::EveryNBytes { bytes: 100 });
        assert!(!tracker.record(60));
        assert!(tracker.record(40));
        tracker.reset();
        assert_eq!(tracker.unflushed(), 0);
        assert!(!tracker.record(99));
    }
}
