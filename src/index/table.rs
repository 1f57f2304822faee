//! Sharded hash table implementation of the index.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::RecordMetaData;

/// Counters exposed through `Engine::stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    pub add_count: u64,
    pub replace_count: u64,
    pub remove_count: u64,
}

/// Key → `RecordMetaData` map with per-shard locking
pub struct InMemoryIndex {
    map: DashMap<Vec<u8>, RecordMetaData>,

    hits: AtomicU64,
    misses: AtomicU64,
    add_count: AtomicU64,
    replace_count: AtomicU64,
    remove_count: AtomicU64,
}

impl InMemoryIndex {
    /// Create an index with `shards` shards sized for roughly
    /// `expected_records` keys. The shard count is rounded up to a power
    /// of two no smaller than 2.
    pub fn new(shards: usize, expected_records: usize) -> Self {
        let shards = shards.max(2).next_power_of_two();

        Self {
            map: DashMap::with_capacity_and_shard_amount(expected_records, shards),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            add_count: AtomicU64::new(0),
            replace_count: AtomicU64::new(0),
            remove_count: AtomicU64::new(0),
        }
    }

    /// Insert or overwrite; true once the mapping is stored
    pub fn put(&self, key: Vec<u8>, meta: RecordMetaData) -> bool {
        self.upsert(key, meta);
        true
    }

    /// Insert or overwrite, returning the location that was replaced
    pub fn upsert(&self, key: Vec<u8>, meta: RecordMetaData) -> Option<RecordMetaData> {
        let previous = self.map.insert(key, meta);
        match previous {
            Some(_) => self.replace_count.fetch_add(1, Ordering::Relaxed),
            None => self.add_count.fetch_add(1, Ordering::Relaxed),
        };
        previous
    }

    pub fn get(&self, key: &[u8]) -> Option<RecordMetaData> {
        let found = self.map.get(key).map(|entry| *entry.value());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Remove the key; true if it was present
    pub fn remove(&self, key: &[u8]) -> bool {
        self.remove_entry(key).is_some()
    }

    /// Remove the key, returning its last location
    pub fn remove_entry(&self, key: &[u8]) -> Option<RecordMetaData> {
        let removed = self.map.remove(key).map(|(_, meta)| meta);
        if removed.is_some() {
            self.remove_count.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Atomically swap `expected` for `new`.
    ///
    /// Fails (returns false) if the key is gone or maps to anything other
    /// than `expected`.
    pub fn replace(&self, key: &[u8], expected: &RecordMetaData, new: RecordMetaData) -> bool {
        // the entry guard holds the shard's write lock for the comparison
        match self.map.get_mut(key) {
            Some(mut current) if *current == *expected => {
                *current = new;
                self.replace_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn size(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every mapping
    pub fn clear(&self) {
        self.map.clear();
        self.map.shrink_to_fit();
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.size(),
            add_count: self.add_count.load(Ordering::Relaxed),
            replace_count: self.replace_count.load(Ordering::Relaxed),
            remove_count: self.remove_count.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.add_count.store(0, Ordering::Relaxed);
        self.replace_count.store(0, Ordering::Relaxed);
        self.remove_count.store(0, Ordering::Relaxed);
    }
}
