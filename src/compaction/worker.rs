//! The compaction worker thread.

use std::any::Any;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::engine::{DbInner, FilePair};
use crate::error::Result;
use crate::index::RecordMetaData;
use crate::record::IndexFileEntry;
use crate::storage::{index_file_path, FileKind, FrameIter};

use super::{CompactionTask, RateLimiter};

pub(super) fn spawn(db: Arc<DbInner>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("emberkv-compaction".to_string())
        .spawn(move || supervise(db))?;
    Ok(handle)
}

/// Run worker loops until one exits normally. A panicking worker has its
/// output abandoned and is replaced by a fresh one on the same queue.
fn supervise(db: Arc<DbInner>) {
    let limiter = RateLimiter::new(db.config.compaction_job_rate_bytes_per_sec);

    loop {
        let mut worker = Worker::new(&db, &limiter);
        match panic::catch_unwind(AssertUnwindSafe(|| worker.run())) {
            Ok(()) => return,
            Err(payload) => {
                tracing::error!(
                    panic = panic_message(payload.as_ref()),
                    file_id = ?worker.in_flight,
                    "compaction worker panicked, starting a new one"
                );
                worker.abandon();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

struct Worker<'a> {
    db: &'a DbInner,
    limiter: &'a RateLimiter,
    /// Compacted data + index file being written
    output: Option<FilePair>,
    in_flight: Option<u32>,
}

impl<'a> Worker<'a> {
    fn new(db: &'a DbInner, limiter: &'a RateLimiter) -> Self {
        Self {
            db,
            limiter,
            output: None,
            in_flight: None,
        }
    }

    fn run(&mut self) {
        let queue = &self.db.compaction;

        loop {
            if queue.stop_requested() {
                self.finish_output();
                return;
            }

            let file_id = match queue.receiver().recv() {
                Ok(CompactionTask::Compact(file_id)) => file_id,
                // a wake-up left over from an earlier stop is ignored
                Ok(CompactionTask::Stop) => continue,
                Err(_) => {
                    self.finish_output();
                    return;
                }
            };

            self.in_flight = Some(file_id);
            let result = self.compact_file(file_id);
            self.in_flight = None;
            queue.task_done();

            match result {
                Ok(()) => {}
                Err(e) if e.is_io() => {
                    tracing::error!(file_id, error = %e, "I/O error during compaction, halting");
                    self.db.set_io_error();
                    queue.halt();
                    self.finish_output();
                    return;
                }
                Err(e) => {
                    tracing::error!(file_id, error = %e, "compaction of file failed, moving on");
                }
            }
        }
    }

    /// Move every live record of `file_id` into the output file, then
    /// delete the source
    fn compact_file(&mut self, file_id: u32) -> Result<()> {
        let source = match self.db.data_file(file_id) {
            Some(source) => source,
            None => {
                tracing::debug!(file_id, "file already compacted");
                return Ok(());
            }
        };

        tracing::info!(file_id, size = source.size(), "compacting file");
        let counters = &self.db.compaction.counters;
        let path = index_file_path(&self.db.dir, file_id);
        let entries = FrameIter::<IndexFileEntry>::new(path.clone(), File::open(&path)?);

        let mut copied = 0u64;
        let mut copied_bytes = 0u64;

        for item in entries {
            let (_, entry) = item?;
            let record_size = entry.record_size as u64;
            counters.scanned(record_size);

            let here = RecordMetaData::new(
                file_id,
                entry.value_offset(),
                entry.value_size(),
                entry.sequence_number,
            );
            if self.db.index.get(&entry.key) != Some(here) {
                continue;
            }

            self.limiter.acquire(record_size);
            let output = ensure_output(self.db, &mut self.output, record_size)?;

            let offset = source.transfer_to(entry.record_offset as u64, record_size, &output.data)?;
            let moved_entry = IndexFileEntry::with_version(
                entry.key,
                entry.record_size,
                offset as u32,
                entry.sequence_number,
                entry.version,
            )?;
            output.index.append(&moved_entry)?;
            counters.copied(record_size);
            copied += 1;
            copied_bytes += record_size;

            let moved = RecordMetaData::new(
                output.id(),
                moved_entry.value_offset(),
                moved_entry.value_size(),
                moved_entry.sequence_number,
            );
            if self.db.index.replace(&moved_entry.key, &here, moved) {
                counters.replaced();
            } else {
                // a put landed after the freshness check; the copy is garbage
                tracing::warn!(file_id, output = output.id(), "lost index update to a concurrent write");
                counters.lost_race();
                self.db.mark_stale(output.id(), record_size);
            }
        }

        if copied > 0 {
            if let Some(output) = &self.output {
                output.flush()?;
            }
        }

        self.db.retire_file(file_id)?;
        counters.file_compacted();
        tracing::info!(file_id, records = copied, bytes = copied_bytes, "compacted file");
        Ok(())
    }

    /// Flush and close the output file (orderly stop)
    fn finish_output(&mut self) {
        if let Some(output) = self.output.take() {
            if let Err(e) = output.close() {
                tracing::error!(file_id = output.id(), error = %e, "failed to close compaction output");
            }
        }
        self.db.compaction.set_current_output(0);
    }

    /// Give up on the state left by a panicked run
    fn abandon(&mut self) {
        if self.in_flight.take().is_some() {
            self.db.compaction.task_done();
        }
        self.finish_output();
    }
}

/// Current output pair, rolled over when `record_size` more bytes would
/// not fit
fn ensure_output<'o>(
    db: &DbInner,
    output: &'o mut Option<FilePair>,
    record_size: u64,
) -> Result<&'o FilePair> {
    let max_file_size = db.config.max_file_size as u64;

    let files = match output.take() {
        Some(files) if files.data.size() + record_size <= max_file_size => files,
        previous => {
            if let Some(previous) = previous {
                previous.close()?;
                tracing::debug!(file_id = previous.id(), "rolled over compaction output");
            }
            let fresh = db.create_file_pair(FileKind::Compacted)?;
            db.compaction.set_current_output(fresh.id());
            db.schedule_stale_files();
            fresh
        }
    };

    Ok(&*output.insert(files))
}
