//! Engine statistics snapshot.

use std::collections::BTreeMap;
use std::fmt;

use crate::compaction::CompactionStats;
use crate::config::Config;
use crate::index::IndexStats;

/// Point-in-time view of an engine's counters
#[derive(Debug, Clone)]
pub struct Stats {
    /// Live keys
    pub size: u64,
    pub index: IndexStats,
    pub compaction: CompactionStats,
    /// Files queued or being compacted
    pub pending_compaction_files: usize,
    /// Stale bytes not yet handed to compaction, by file id
    pub stale_bytes_per_file: BTreeMap<u32, u64>,
    pub data_files: usize,
    pub tombstone_files: usize,
    pub config: Config,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "keys:                 {}", self.size)?;
        writeln!(f, "data files:           {}", self.data_files)?;
        writeln!(f, "tombstone files:      {}", self.tombstone_files)?;
        writeln!(
            f,
            "index:                hits={} misses={} adds={} replaces={} removes={}",
            self.index.hits,
            self.index.misses,
            self.index.add_count,
            self.index.replace_count,
            self.index.remove_count
        )?;
        writeln!(
            f,
            "compaction:           files={} copied={} ({} bytes) replaced={} lost_races={}",
            self.compaction.files_compacted,
            self.compaction.records_copied,
            self.compaction.bytes_copied,
            self.compaction.records_replaced,
            self.compaction.lost_races
        )?;
        writeln!(f, "pending compactions:  {}", self.pending_compaction_files)?;
        for (file_id, bytes) in &self.stale_bytes_per_file {
            writeln!(f, "stale bytes in {:>6}: {}", file_id, bytes)?;
        }
        Ok(())
    }
}
