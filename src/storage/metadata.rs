//! Metadata witness file
//!
//! ```text
//! ┌─────────┬─────────┬──────────┬─────────┬──────────────┬──────────────────┐
//! │ CRC (4) │ Ver (1) │ Open (1) │ Seq (8) │ IoError (1)  │ MaxFileSize (4)  │
//! └─────────┴─────────┴──────────┴─────────┴──────────────┴──────────────────┘
//! ```
//! Written to `META.tmp`, fsynced, renamed over `META`, then the directory
//! is fsynced, so a reader sees either the old or the new record.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{EmberError, Result};

use super::layout::{sync_dir, META_FILENAME};

const TMP_SUFFIX: &str = ".tmp";

/// Persistent open/crash state of a database directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbMetadata {
    pub version: u8,
    /// Set while the database is open; still set after a crash
    pub open: bool,
    /// Last sequence number issued, written on close
    pub sequence_number: u64,
    /// Set when a write path hit a fatal I/O error
    pub io_error: bool,
    /// `max_file_size` the database was created with (0 = unknown)
    pub max_file_size: u32,
}

impl Default for DbMetadata {
    fn default() -> Self {
        Self {
            version: Self::FORMAT_VERSION,
            open: false,
            sequence_number: 0,
            io_error: false,
            max_file_size: 0,
        }
    }
}

impl DbMetadata {
    pub const SIZE: usize = 19;
    pub const FORMAT_VERSION: u8 = 0;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut body = &mut out[4..];
        body.put_u8(self.version);
        body.put_u8(self.open as u8);
        body.put_u64(self.sequence_number);
        body.put_u8(self.io_error as u8);
        body.put_u32(self.max_file_size);

        let checksum = crc32fast::hash(&out[4..]);
        out[..4].copy_from_slice(&checksum.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(EmberError::Corrupt(format!(
                "metadata is {} bytes, expected {}",
                bytes.len(),
                Self::SIZE
            )));
        }

        let mut buf = bytes;
        let checksum = buf.get_u32();
        if crc32fast::hash(&bytes[4..]) != checksum {
            return Err(EmberError::Corrupt("metadata checksum mismatch".to_string()));
        }

        Ok(Self {
            version: buf.get_u8(),
            open: buf.get_u8() != 0,
            sequence_number: buf.get_u64(),
            io_error: buf.get_u8() != 0,
            max_file_size: buf.get_u32(),
        })
    }

    /// Load `META` from `dir`; `None` for a fresh directory
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        match fs::read(dir.join(META_FILENAME)) {
            Ok(bytes) => Self::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace `META` in `dir`
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp_path = dir.join(format!("{}{}", META_FILENAME, TMP_SUFFIX));
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&self.encode())?;
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, dir.join(META_FILENAME))?;
        sync_dir(dir)
    }
}
