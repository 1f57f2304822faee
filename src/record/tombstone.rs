//! Tombstone entries
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────┬─────┐
//! │ CRC (4) │ Ver (1) │ Seq (8) │ KeySize (1)  │ Key │
//! └─────────┴─────────┴─────────┴──────────────┴─────┘
//! ```

use std::io::Read;

use bytes::{Buf, BufMut};

use crate::error::Result;

use super::{fill_buf, validate_key_size, validate_version, Decoded, Fill, CURRENT_VERSION};

/// Deletion marker for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneEntry {
    pub checksum: u32,
    pub version: u8,
    pub key: Vec<u8>,
    pub sequence_number: u64,
}

impl TombstoneEntry {
    /// CRC (4) + version (1) + sequence (8) + key size (1)
    pub const HEADER_SIZE: usize = 14;

    /// Key sizes are stored in a single signed-range byte
    pub const MAX_KEY_SIZE: usize = 127;

    pub fn new(key: Vec<u8>, sequence_number: u64) -> Result<Self> {
        Self::with_version(key, sequence_number, CURRENT_VERSION)
    }

    pub fn with_version(key: Vec<u8>, sequence_number: u64, version: u8) -> Result<Self> {
        validate_version(version)?;
        validate_key_size(key.len(), Self::MAX_KEY_SIZE)?;

        let mut entry = Self {
            checksum: 0,
            version,
            key,
            sequence_number,
        };
        entry.checksum = entry.compute_checksum();
        Ok(entry)
    }

    fn encode_header_without_checksum(&self) -> [u8; Self::HEADER_SIZE - 4] {
        let mut out = [0u8; Self::HEADER_SIZE - 4];
        let mut buf = &mut out[..];
        buf.put_u8(self.version);
        buf.put_u64(self.sequence_number);
        buf.put_u8(self.key.len() as u8);
        out
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.encode_header_without_checksum());
        hasher.update(&self.key);
        hasher.finalize()
    }

    pub fn entry_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entry_size());
        buf.put_u32(self.checksum);
        buf.put_slice(&self.encode_header_without_checksum());
        buf.put_slice(&self.key);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Decoded<Self> {
        let mut reader = bytes;
        match Self::read_from(&mut reader) {
            Ok(decoded) => decoded,
            Err(e) => Decoded::Corrupt(e.to_string()),
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>> {
        let mut header = [0u8; Self::HEADER_SIZE];
        match fill_buf(reader, &mut header)? {
            Fill::Empty => return Ok(Decoded::End),
            Fill::Partial => return Ok(Decoded::Truncated),
            Fill::Full => {}
        }

        let mut buf = &header[..];
        let checksum = buf.get_u32();
        let version = buf.get_u8();
        let sequence_number = buf.get_u64();
        let key_size = buf.get_u8() as usize;

        if key_size > Self::MAX_KEY_SIZE {
            return Ok(Decoded::Corrupt(format!("tombstone key size {}", key_size)));
        }

        let mut key = vec![0u8; key_size];
        if !matches!(fill_buf(reader, &mut key)?, Fill::Full) {
            return Ok(Decoded::Truncated);
        }

        let entry = Self {
            checksum,
            version,
            key,
            sequence_number,
        };

        if entry.compute_checksum() != checksum {
            return Ok(Decoded::Corrupt(format!(
                "tombstone checksum mismatch (sequence {})",
                sequence_number
            )));
        }

        Ok(Decoded::Complete(entry))
    }
}
