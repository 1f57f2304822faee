//! Sequential frame iteration
//!
//! Walks a file from offset 0 and stops at the first frame that is not
//! complete and checksum-valid. Each call to `iter()` on a file opens a
//! new handle, so iteration is restartable per call.

use std::fs::File;
use std::io::{BufReader, Read};
use std::marker::PhantomData;
use std::path::PathBuf;

use crate::error::Result;
use crate::record::{Decoded, IndexFileEntry, RecordEntry, TombstoneEntry};

/// Something that can be read back frame by frame
pub trait Frame: Sized {
    fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>>;

    /// Bytes this frame occupies on disk
    fn frame_size(&self) -> usize;
}

impl Frame for RecordEntry {
    fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>> {
        RecordEntry::read_from(reader)
    }

    fn frame_size(&self) -> usize {
        self.record_size()
    }
}

impl Frame for IndexFileEntry {
    fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>> {
        IndexFileEntry::read_from(reader)
    }

    fn frame_size(&self) -> usize {
        self.entry_size()
    }
}

impl Frame for TombstoneEntry {
    fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>> {
        TombstoneEntry::read_from(reader)
    }

    fn frame_size(&self) -> usize {
        self.entry_size()
    }
}

/// How iteration over a file ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailState {
    /// Still iterating
    Pending,
    /// Reached end of file on a frame boundary
    Clean,
    /// Last frame was cut short
    Truncated,
    /// A frame failed validation
    Corrupt(String),
}

/// Iterator yielding `(offset, frame)` pairs
pub struct FrameIter<T: Frame> {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    tail: TailState,
    _frame: PhantomData<T>,
}

impl<T: Frame> FrameIter<T> {
    pub(crate) fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            reader: BufReader::new(file),
            offset: 0,
            tail: TailState::Pending,
            _frame: PhantomData,
        }
    }

    /// How the walk ended; `Pending` until the iterator returns `None`
    pub fn tail(&self) -> &TailState {
        &self.tail
    }

    /// Offset just past the last valid frame returned
    pub fn valid_len(&self) -> u64 {
        self.offset
    }
}

impl<T: Frame> Iterator for FrameIter<T> {
    type Item = Result<(u64, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tail != TailState::Pending {
            return None;
        }

        match T::read_from(&mut self.reader) {
            Ok(Decoded::Complete(frame)) => {
                let offset = self.offset;
                self.offset += frame.frame_size() as u64;
                Some(Ok((offset, frame)))
            }
            Ok(Decoded::End) => {
                self.tail = TailState::Clean;
                None
            }
            Ok(Decoded::Truncated) => {
                tracing::warn!(path = %self.path.display(), offset = self.offset, "truncated frame, stopping");
                self.tail = TailState::Truncated;
                None
            }
            Ok(Decoded::Corrupt(reason)) => {
                tracing::warn!(path = %self.path.display(), offset = self.offset, %reason, "corrupt frame, stopping");
                self.tail = TailState::Corrupt(reason);
                None
            }
            Err(e) => {
                self.tail = TailState::Corrupt(e.to_string());
                Some(Err(e))
            }
        }
    }
}
