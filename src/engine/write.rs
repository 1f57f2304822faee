//! Write path: put and delete.
//!
//! Both run entirely under the writer lock, so rollover, append, index
//! update and stale accounting happen as one step per write.

use crate::error::{EmberError, Result};
use crate::index::RecordMetaData;
use crate::record::{IndexFileEntry, RecordEntry, TombstoneEntry, MAX_VALUE_SIZE};
use crate::storage::{FileKind, TombstoneFile};

use super::inner::{DbInner, FilePair, WriterState};

/// Keys longer than this are rejected
pub const MAX_KEY_LEN: usize = 127;

impl DbInner {
    pub(crate) fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_key(key)?;
        self.check_value(key, value)?;

        let mut writer = self.writer.lock();
        self.ensure_open()?;

        let record = RecordEntry::new(key.to_vec(), value.to_vec(), self.sequence.next())?;
        let meta = self
            .append_record(&mut writer, &record)
            .map_err(|e| self.fatal(e))?;

        if let Some(previous) = self.index.upsert(record.key, meta) {
            self.mark_stale(previous.file_id, previous.record_size(key.len()) as u64);
        }

        Ok(())
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_key(key)?;

        let mut writer = self.writer.lock();
        self.ensure_open()?;

        // only writers remove keys, and they hold the writer lock
        if !self.index.contains_key(key) {
            return Ok(());
        }

        let tombstone = TombstoneEntry::new(key.to_vec(), self.sequence.next())?;
        self.append_tombstone(&mut writer, &tombstone)
            .map_err(|e| self.fatal(e))?;

        if let Some(previous) = self.index.remove_entry(key) {
            self.mark_stale(previous.file_id, previous.record_size(key.len()) as u64);
        }
        Ok(())
    }

    fn check_value(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let fits_in_file = (self.config.max_file_size as usize)
            .saturating_sub(RecordEntry::HEADER_SIZE + key.len());
        let max = MAX_VALUE_SIZE.min(fits_in_file);
        if value.len() > max {
            return Err(EmberError::ValueTooLarge {
                len: value.len(),
                max,
            });
        }
        Ok(())
    }

    /// Append a record and its index entry, rolling over first if needed.
    ///
    /// After a failed append the pair is dropped from the writer, so the
    /// next write starts a fresh file instead of appending behind a
    /// partially written frame.
    fn append_record(
        &self,
        writer: &mut WriterState,
        record: &RecordEntry,
    ) -> Result<RecordMetaData> {
        let record_size = record.record_size() as u64;
        let max_file_size = self.config.max_file_size as u64;

        let files = match writer.data.take() {
            Some(files) if files.data.size() + record_size <= max_file_size => files,
            previous => {
                if let Some(previous) = previous {
                    self.set_current_write_file(0);
                    previous.close()?;
                    tracing::debug!(file_id = previous.id(), "rolled over data file");
                }
                let fresh = self.create_file_pair(FileKind::Plain)?;
                self.set_current_write_file(fresh.id());
                // the sealed file may already be past the threshold
                self.schedule_stale_files();
                fresh
            }
        };

        match write_record(&files, record) {
            Ok(meta) => {
                writer.data = Some(files);
                Ok(meta)
            }
            Err(e) => {
                tracing::warn!(file_id = files.id(), error = %e, "append failed, abandoning data file");
                self.set_current_write_file(0);
                if let Err(close_err) = files.close() {
                    tracing::warn!(file_id = files.id(), error = %close_err, "failed to close abandoned data file");
                }
                Err(e)
            }
        }
    }

    fn append_tombstone(&self, writer: &mut WriterState, tombstone: &TombstoneEntry) -> Result<()> {
        let entry_size = tombstone.entry_size() as u64;
        let max_file_size = self.config.max_file_size as u64;

        let file = match writer.tombstone.take() {
            Some(file) if file.size() + entry_size <= max_file_size => file,
            previous => {
                if let Some(previous) = previous {
                    previous.close()?;
                    tracing::debug!(file_id = previous.id(), "rolled over tombstone file");
                }
                let id = self.allocate_file_id();
                TombstoneFile::create(&self.dir, id, self.config.flush_policy)?
            }
        };

        match file.append(tombstone) {
            Ok(_) => {
                writer.tombstone = Some(file);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(file_id = file.id(), error = %e, "append failed, abandoning tombstone file");
                if let Err(close_err) = file.close() {
                    tracing::warn!(file_id = file.id(), error = %close_err, "failed to close abandoned tombstone file");
                }
                Err(e)
            }
        }
    }

    /// Flush and release the writer's files (close path)
    pub(crate) fn close_writer(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(files) = writer.data.take() {
            files.close()?;
        }
        if let Some(tombstone) = writer.tombstone.take() {
            tombstone.close()?;
        }
        self.set_current_write_file(0);
        Ok(())
    }
}

/// Append `record` to the data file and its entry to the index file
fn write_record(files: &FilePair, record: &RecordEntry) -> Result<RecordMetaData> {
    let offset = files.data.append(record)?;
    let entry = IndexFileEntry::new(
        record.key.clone(),
        record.record_size() as u32,
        offset as u32,
        record.sequence_number(),
    )?;
    files.index.append(&entry)?;

    Ok(RecordMetaData::new(
        files.id(),
        entry.value_offset(),
        record.header.value_size,
        record.sequence_number(),
    ))
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(EmberError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}
