//! Tombstone File
//!
//! Log of deletions. Never compacted: tombstones are replayed once at
//! startup against the rebuilt index and are historical afterwards.

use std::path::Path;

use crate::config::FlushPolicy;
use crate::error::Result;
use crate::record::TombstoneEntry;

use super::append::AppendFile;
use super::iter::FrameIter;
use super::layout::tombstone_file_path;

/// Append-only tombstone file `{id}.tombstone`
pub struct TombstoneFile {
    id: u32,
    file: AppendFile,
}

impl TombstoneFile {
    pub fn create(dir: &Path, id: u32, policy: FlushPolicy) -> Result<Self> {
        Ok(Self {
            id,
            file: AppendFile::create(&tombstone_file_path(dir, id), policy)?,
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

    pub fn append(&self, entry: &TombstoneEntry) -> Result<u64> {
        self.file.append(&entry.encode())
    }

    pub fn iter(&self) -> Result<FrameIter<TombstoneEntry>> {
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
