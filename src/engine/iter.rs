//! Live key / value iteration.
//!
//! The set of data files is snapshotted when the iterator is created. Each
//! file's index is walked in order and a record is produced only while the
//! in-memory index still points at that exact location, so superseded,
//! deleted and compacted-away copies are skipped instead of returned.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{EmberError, Result};
use crate::index::RecordMetaData;
use crate::record::{IndexFileEntry, Record};
use crate::storage::{index_file_path, DataFile, FrameIter};

use super::inner::DbInner;

/// Lazy sequence of live records; see `Engine::iter`
pub struct EngineIterator {
    db: Arc<DbInner>,
    pending: VecDeque<u32>,
    current: Option<(Arc<DataFile>, FrameIter<IndexFileEntry>)>,
    done: bool,
}

impl EngineIterator {
    pub(crate) fn new(db: Arc<DbInner>) -> Self {
        let pending = db.data_file_ids().into();
        Self {
            db,
            pending,
            current: None,
            done: false,
        }
    }

    /// Open the next snapshotted file that still exists
    fn advance_file(&mut self) -> Result<bool> {
        while let Some(id) = self.pending.pop_front() {
            let file = match self.db.data_file(id) {
                Some(file) => file,
                None => continue,
            };

            let path = index_file_path(&self.db.dir, id);
            let index = match std::fs::File::open(&path) {
                Ok(index) => index,
                // compacted away after the lookup above
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            self.current = Some((file, FrameIter::new(path, index)));
            return Ok(true);
        }
        Ok(false)
    }

    /// Next live record, or None once every file is exhausted
    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.db.ensure_open()?;

            let (file, entries) = match &mut self.current {
                Some(current) => current,
                None => {
                    if !self.advance_file()? {
                        return Ok(None);
                    }
                    continue;
                }
            };

            let entry = match entries.next() {
                Some(entry) => entry?.1,
                None => {
                    self.current = None;
                    continue;
                }
            };

            let here = RecordMetaData::new(
                file.id(),
                entry.value_offset(),
                entry.value_size(),
                entry.sequence_number,
            );
            if self.db.index.get(&entry.key) != Some(here) {
                continue;
            }

            match file.read_at(here.value_offset as u64, here.value_size as usize) {
                Ok(value) => {
                    return Ok(Some(Record {
                        key: entry.key,
                        value,
                    }))
                }
                Err(_) if self.db.data_file(file.id()).is_none() => {
                    // retired while we were reading it; its live records
                    // now sit in a newer file
                    if self.db.is_closing() {
                        return Err(EmberError::EngineClosing);
                    }
                    self.current = None;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Iterator for EngineIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
