//! Data File
//!
//! One generation of the record log. Records are appended by the writer
//! (`.data`) or by compaction (`.datac`) and read back either at a known
//! value offset or sequentially during repair.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;

use crate::config::FlushPolicy;
use crate::error::Result;
use crate::record::RecordEntry;

use super::append::AppendFile;
use super::iter::FrameIter;
use super::layout::{data_file_path, FileKind};

/// An append-only record log segment
pub struct DataFile {
    id: u32,
    kind: FileKind,
    file: AppendFile,
    /// Read-only handle used for positioned reads
    reader: File,
    /// Handle with its own cursor for transfers to another file
    transfer: Mutex<Option<File>>,
}

impl DataFile {
    /// Create a new data file `{id}.data` / `{id}.datac`
    pub fn create(dir: &Path, id: u32, kind: FileKind, policy: FlushPolicy) -> Result<Self> {
        let file = AppendFile::create(&data_file_path(dir, id, kind), policy)?;
        Self::from_append_file(id, kind, file)
    }

    /// Open an existing data file for reading and further appends
    pub fn open(dir: &Path, id: u32, kind: FileKind, policy: FlushPolicy) -> Result<Self> {
        let file = AppendFile::open(&data_file_path(dir, id, kind), policy)?;
        Self::from_append_file(id, kind, file)
    }

    fn from_append_file(id: u32, kind: FileKind, file: AppendFile) -> Result<Self> {
        let reader = file.reader()?;
        Ok(Self {
            id,
            kind,
            file,
            reader,
            transfer: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Current write offset (== logical file size)
    pub fn size(&self) -> u64 {
        self.file.size()
    }

    /// Append a record, returning the offset of its first byte
    pub fn append(&self, entry: &RecordEntry) -> Result<u64> {
        self.file.append(&entry.encode())
    }

    /// Read `len` bytes at `offset` without disturbing appends
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        read_exact_at(&self.reader, &mut buf, offset)?;
        Ok(buf)
    }

    /// Copy `len` bytes starting at `offset` to the end of `dest`.
    ///
    /// Goes through `io::copy`, which uses in-kernel copying between files
    /// where the platform supports it. Returns the offset in `dest`.
    pub fn transfer_to(&self, offset: u64, len: u64, dest: &DataFile) -> Result<u64> {
        let mut guard = self.transfer.lock();
        let source = match &mut *guard {
            Some(source) => source,
            slot @ None => slot.insert(self.file.reader()?),
        };

        source.seek(SeekFrom::Start(offset))?;
        dest.file.append_from(source, len)
    }

    /// Iterate all records from offset 0, stopping at the first invalid one
    pub fn iter(&self) -> Result<FrameIter<RecordEntry>> {
        Ok(FrameIter::new(self.path().to_path_buf(), self.file.reader()?))
    }

    /// fsync
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    /// Flush pending writes; the handle stays readable
    pub fn close(&self) -> Result<()> {
        self.file.close()
    }

    /// Remove the file from disk. Open handles stay readable until dropped
    /// on platforms that allow unlinking open files.
    pub fn delete(&self) -> Result<()> {
        *self.transfer.lock() = None;
        self.file.delete()
    }
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut std::mem::take(&mut buf)[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
