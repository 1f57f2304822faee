//! Index rebuild on open.
//!
//! Replays index files oldest to newest, keeping the entry with the highest
//! sequence number per key, then applies tombstones. The result matches
//! replaying every put and delete in sequence order.

use std::fs::File;

use crate::error::Result;
use crate::index::RecordMetaData;
use crate::record::{IndexFileEntry, TombstoneEntry};
use crate::storage::{
    index_file_path, list_index_files, list_tombstone_files, tombstone_file_path, FrameIter,
};

use super::inner::DbInner;

/// What a rebuild went through
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub index_files: usize,
    pub index_entries: u64,
    pub tombstone_files: usize,
    pub tombstones: u64,
    /// Highest sequence number seen in any entry
    pub max_sequence: u64,
}

impl DbInner {
    pub(crate) fn rebuild_index(&self) -> Result<RebuildSummary> {
        let mut summary = RebuildSummary::default();

        for id in list_index_files(&self.dir)? {
            if self.data_file(id).is_none() {
                tracing::warn!(file_id = id, "index file without data file, skipping");
                continue;
            }

            let path = index_file_path(&self.dir, id);
            let entries = FrameIter::<IndexFileEntry>::new(path.clone(), File::open(&path)?);
            for item in entries {
                let (_, entry) = item?;
                summary.index_entries += 1;
                summary.max_sequence = summary.max_sequence.max(entry.sequence_number);
                self.apply_index_entry(id, entry);
            }
            summary.index_files += 1;
        }

        for id in list_tombstone_files(&self.dir)? {
            let path = tombstone_file_path(&self.dir, id);
            let entries = FrameIter::<TombstoneEntry>::new(path.clone(), File::open(&path)?);
            for item in entries {
                let (_, tombstone) = item?;
                summary.tombstones += 1;
                summary.max_sequence = summary.max_sequence.max(tombstone.sequence_number);
                self.apply_tombstone(&tombstone);
            }
            summary.tombstone_files += 1;
        }

        self.index.reset_stats();
        Ok(summary)
    }

    fn apply_index_entry(&self, file_id: u32, entry: IndexFileEntry) {
        let meta = RecordMetaData::new(
            file_id,
            entry.value_offset(),
            entry.value_size(),
            entry.sequence_number,
        );

        match self.index.get(&entry.key) {
            None => {
                self.index.put(entry.key, meta);
            }
            Some(existing) if existing.sequence_number < entry.sequence_number => {
                self.add_stale(existing.file_id, existing.record_size(entry.key.len()) as u64);
                self.index.put(entry.key, meta);
            }
            Some(_) => {
                self.add_stale(file_id, entry.record_size as u64);
            }
        }
    }

    fn apply_tombstone(&self, tombstone: &TombstoneEntry) {
        if let Some(existing) = self.index.get(&tombstone.key) {
            if existing.sequence_number < tombstone.sequence_number {
                self.index.remove(&tombstone.key);
                self.add_stale(
                    existing.file_id,
                    existing.record_size(tombstone.key.len()) as u64,
                );
            }
        }
    }
}
