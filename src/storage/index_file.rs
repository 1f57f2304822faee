//! Index File
//!
//! Parallel stream of `IndexFileEntry` for the data file with the same id.

use std::path::Path;

use crate::config::FlushPolicy;
use crate::error::Result;
use crate::record::IndexFileEntry;

use super::append::AppendFile;
use super::iter::FrameIter;
use super::layout::index_file_path;

/// Append-only index file `{id}.index`
pub struct IndexFile {
    id: u32,
    file: AppendFile,
}

impl IndexFile {
    pub fn create(dir: &Path, id: u32, policy: FlushPolicy) -> Result<Self> {
        Ok(Self {
            id,
            file: AppendFile::create(&index_file_path(dir, id), policy)?,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.file.size()
    }

    pub fn append(&self, entry: &IndexFileEntry) -> Result<u64> {
        self.file.append(&entry.encode())
    }

    /// Iterate entries from the start; stops at the first invalid one
    pub fn iter(&self) -> Result<FrameIter<IndexFileEntry>> {
        Ok(FrameIter::new(self.path().to_path_buf(), self.file.reader()?))
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.file.close()
    }

    pub fn delete(&self) -> Result<()> {
        self.file.delete()
    }
}
