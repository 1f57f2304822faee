//! Record Codec
//!
//! Binary framing for everything EmberKV writes to disk.
//!
//! ## Responsibilities
//! - Serialize key/value records for data files
//! - Serialize per-record pointers for index files
//! - Serialize deletion markers for tombstone files
//! - Verify CRC32 checksums on the way back in
//!
//! ## Packed version / key size
//! Records and index entries share a 2-byte field holding a 5-bit format
//! version and an 11-bit key size:
//! ```text
//! ┌───────────────────────────┬───────────────────────┐
//! │ byte 0                    │ byte 1                │
//! │ version (5) │ key hi (3)  │ key lo (8)            │
//! └───────────────────────────┴───────────────────────┘
//! ```
//! All integers are big-endian.

mod entry;
mod index_entry;
mod tombstone;

use std::io::{self, Read};

pub use entry::{Record, RecordEntry, RecordHeader};
pub use index_entry::IndexFileEntry;
pub use tombstone::TombstoneEntry;

use crate::error::{EmberError, Result};

// =============================================================================
// Shared Constants
// =============================================================================

/// Format version written by this build
pub const CURRENT_VERSION: u8 = 0;

/// Largest version that fits in the packed 5-bit field
pub const MAX_VERSION: u8 = 31;

/// Largest key size representable by the packed 11-bit field
pub const MAX_KEY_SIZE: usize = 2047;

/// Values must stay below 2^29 bytes
pub const MAX_VALUE_SIZE: usize = (1 << 29) - 1;

// =============================================================================
// Decode Outcome
// =============================================================================

/// Outcome of decoding one frame from a byte stream.
///
/// Corruption is an expected condition at the unsealed tail of the newest
/// file, so it is a value here rather than an error. Readers treat anything
/// but `Complete` as "stop reading this file here".
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A whole, checksum-valid frame
    Complete(T),

    /// Clean end of stream on a frame boundary
    End,

    /// Stream ended in the middle of a frame
    Truncated,

    /// Header or checksum failed validation
    Corrupt(String),
}

impl<T> Decoded<T> {
    /// The decoded value, if the frame was complete
    pub fn complete(self) -> Option<T> {
        match self {
            Decoded::Complete(value) => Some(value),
            _ => None,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn pack_version_and_key_size(version: u8, key_size: u16) -> [u8; 2] {
    [(version << 3) | ((key_size >> 8) as u8 & 0x07), (key_size & 0xFF) as u8]
}

pub(crate) fn unpack_version_and_key_size(hi: u8, lo: u8) -> (u8, u16) {
    let version = hi >> 3;
    let key_size = (((hi & 0x07) as u16) << 8) | lo as u16;
    (version, key_size)
}

pub(crate) fn validate_version(version: u8) -> Result<()> {
    if version > MAX_VERSION {
        return Err(EmberError::InvalidRecord(format!(
            "version {} exceeds {}",
            version, MAX_VERSION
        )));
    }
    Ok(())
}

pub(crate) fn validate_key_size(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(EmberError::InvalidRecord(format!(
            "key size {} exceeds {}",
            len, max
        )));
    }
    Ok(())
}

/// How much of a requested buffer a reader could fill
pub(crate) enum Fill {
    Full,
    Empty,
    Partial,
}

/// Like `read_exact`, but reports EOF instead of failing on it
pub(crate) fn fill_buf<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(match filled {
        n if n == buf.len() => Fill::Full,
        0 => Fill::Empty,
        _ => Fill::Partial,
    })
}
