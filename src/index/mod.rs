//! In-Memory Index
//!
//! Maps every live key to the location of its freshest record.
//!
//! ## Responsibilities
//! - Point lookups for `get`
//! - Atomic upsert / remove that hand back the previous location, so the
//!   engine can account the superseded bytes as stale
//! - Compare-and-replace, used by compaction to move a record only if no
//!   writer touched the key in the meantime
//!
//! ## Concurrency
//! Backed by a `DashMap` with a power-of-two number of shards, each behind
//! its own lock. All mutation of a key happens under its shard's write lock,
//! which makes every operation, including `replace`, linearizable per key.

mod table;

pub use table::{InMemoryIndex, IndexStats};

/// Location of the freshest version of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordMetaData {
    /// Data file holding the record
    pub file_id: u32,
    /// Absolute offset of the value inside that file
    pub value_offset: u32,
    /// Length of the value
    pub value_size: u32,
    /// Sequence number of the write that produced the record
    pub sequence_number: u64,
}

impl RecordMetaData {
    pub fn new(file_id: u32, value_offset: u32, value_size: u32, sequence_number: u64) -> Self {
        Self {
            file_id,
            value_offset,
            value_size,
            sequence_number,
        }
    }

    /// Size of the full on-disk record for a key of `key_len` bytes
    pub fn record_size(&self, key_len: usize) -> u32 {
        (crate::record::RecordEntry::HEADER_SIZE + key_len) as u32 + self.value_size
    }

    /// Offset of the record header inside its data file
    pub fn record_offset(&self, key_len: usize) -> u32 {
        self.value_offset - (crate::record::RecordEntry::HEADER_SIZE + key_len) as u32
    }
}
