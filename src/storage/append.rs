//! Append-only file handle shared by data, index and tombstone files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::FlushPolicy;
use crate::error::Result;

use super::FlushTracker;

/// Write side state, guarded together so offsets and flush accounting agree
struct WriteState {
    offset: u64,
    tracker: FlushTracker,
}

/// A file that only ever grows at its end.
///
/// The write offset lives in memory and mirrors the file length; appends
/// from several threads are serialized by an internal lock.
pub(crate) struct AppendFile {
    path: PathBuf,
    file: File,
    state: Mutex<WriteState>,
}

impl AppendFile {
    /// Create a new, empty file. Fails if it already exists.
    pub fn create(path: &Path, policy: FlushPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self::with_offset(path, file, 0, policy))
    }

    /// Open an existing file positioned at its end
    pub fn open(path: &Path, policy: FlushPolicy) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let offset = file.seek(SeekFrom::End(0))?;
        Ok(Self::with_offset(path, file, offset, policy))
    }

    fn with_offset(path: &Path, file: File, offset: u64, policy: FlushPolicy) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            state: Mutex::new(WriteState {
                offset,
                tracker: FlushTracker::new(policy),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical length of the file
    pub fn size(&self) -> u64 {
        self.state.lock().offset
    }

    /// Append `bytes`, returning the offset they were written at.
    ///
    /// A failed write is cut back off the file so the next append starts
    /// at the recorded offset again.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut state = self.state.lock();
        let offset = state.offset;

        if let Err(e) = (&self.file).write_all(bytes) {
            self.rewind(offset);
            return Err(e.into());
        }
        state.offset += bytes.len() as u64;

        if state.tracker.record(bytes.len() as u64) {
            self.file.sync_data()?;
            state.tracker.reset();
        }

        Ok(offset)
    }

    /// Append exactly `len` bytes pulled from `source`
    pub fn append_from<R: Read>(&self, source: &mut R, len: u64) -> Result<u64> {
        let mut state = self.state.lock();
        let offset = state.offset;

        let mut out = &self.file;
        let copied = match io::copy(&mut source.take(len), &mut out) {
            Ok(copied) => copied,
            Err(e) => {
                self.rewind(offset);
                return Err(e.into());
            }
        };

        if copied != len {
            self.rewind(offset);
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("transferred {} of {} bytes", copied, len),
            )
            .into());
        }

        state.offset += copied;
        let flush_due = state.tracker.record(copied);

        if flush_due {
            self.file.sync_data()?;
            state.tracker.reset();
        }

        Ok(offset)
    }

    /// Drop whatever a failed append left past `offset`
    fn rewind(&self, offset: u64) {
        let result = self
            .file
            .set_len(offset)
            .and_then(|()| (&self.file).seek(SeekFrom::Start(offset)));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), offset, error = %e, "could not cut back failed append");
        }
    }

    /// fsync everything appended so far
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.file.sync_all()?;
        state.tracker.reset();
        Ok(())
    }

    /// Flush only if something was appended since the last flush
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.tracker.unflushed() > 0 {
            self.file.sync_all()?;
            state.tracker.reset();
        }
        Ok(())
    }

    /// Open a fresh read handle positioned at the start
    pub fn reader(&self) -> Result<File> {
        Ok(File::open(&self.path)?)
    }

    pub fn delete(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}
