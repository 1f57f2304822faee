//! Index file entries
//!
//! One entry per record written to the matching data file, so the
//! in-memory index can be rebuilt without reading any values.
//!
//! ```text
//! ┌─────────┬───────────┬───────────┬──────────────┬──────────────┬─────────┬─────┐
//! │ CRC (4) │ Ver|KeyHi │ KeyLo (1) │ RecSize (4)  │ RecOffset (4)│ Seq (8) │ Key │
//! └─────────┴───────────┴───────────┴──────────────┴──────────────┴─────────┴─────┘
//! ```

use std::io::Read;

use bytes::{Buf, BufMut};

use crate::error::Result;

use super::{
    fill_buf, pack_version_and_key_size, unpack_version_and_key_size, validate_key_size,
    validate_version, Decoded, Fill, RecordEntry, CURRENT_VERSION, MAX_KEY_SIZE,
};

/// Pointer to one record in a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFileEntry {
    pub checksum: u32,
    pub version: u8,
    pub key: Vec<u8>,
    pub record_size: u32,
    pub record_offset: u32,
    pub sequence_number: u64,
}

impl IndexFileEntry {
    /// CRC (4) + version/key (2) + record size (4) + record offset (4) + sequence (8)
    pub const HEADER_SIZE: usize = 22;

    pub fn new(
        key: Vec<u8>,
        record_size: u32,
        record_offset: u32,
        sequence_number: u64,
    ) -> Result<Self> {
        Self::with_version(key, record_size, record_offset, sequence_number, CURRENT_VERSION)
    }

    pub fn with_version(
        key: Vec<u8>,
        record_size: u32,
        record_offset: u32,
        sequence_number: u64,
        version: u8,
    ) -> Result<Self> {
        validate_version(version)?;
        validate_key_size(key.len(), MAX_KEY_SIZE)?;

        let mut entry = Self {
            checksum: 0,
            version,
            key,
            record_size,
            record_offset,
            sequence_number,
        };
        entry.checksum = entry.compute_checksum();
        Ok(entry)
    }

    fn encode_header_without_checksum(&self) -> [u8; Self::HEADER_SIZE - 4] {
        let mut out = [0u8; Self::HEADER_SIZE - 4];
        let mut buf = &mut out[..];
        buf.put_slice(&pack_version_and_key_size(self.version, self.key.len() as u16));
        buf.put_u32(self.record_size);
        buf.put_u32(self.record_offset);
        buf.put_u64(self.sequence_number);
        out
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.encode_header_without_checksum());
        hasher.update(&self.key);
        hasher.finalize()
    }

    /// Size of this entry in the index file
    pub fn entry_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len()
    }

    /// Absolute offset of the value inside the data file
    pub fn value_offset(&self) -> u32 {
        self.record_offset + (RecordEntry::HEADER_SIZE + self.key.len()) as u32
    }

    /// Size of the value inside the data file
    pub fn value_size(&self) -> u32 {
        self.record_size - (RecordEntry::HEADER_SIZE + self.key.len()) as u32
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

    /// Read the next entry from a sequential stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>> {
        let mut header = [0u8; Self::HEADER_SIZE];
        match fill_buf(reader, &mut header)? {
            Fill::Empty => return Ok(Decoded::End),
            Fill::Partial => return Ok(Decoded::Truncated),
            Fill::Full => {}
        }

        let mut buf = &header[..];
        let checksum = buf.get_u32();
        let (version, key_size) = unpack_version_and_key_size(buf.get_u8(), buf.get_u8());
        let record_size = buf.get_u32();
        let record_offset = buf.get_u32();
        let sequence_number = buf.get_u64();

        if (record_size as usize) < RecordEntry::HEADER_SIZE + key_size as usize {
            return Ok(Decoded::Corrupt(format!(
                "record size {} smaller than its header and key",
                record_size
            )));
        }

        let mut key = vec![0u8; key_size as usize];
        if !matches!(fill_buf(reader, &mut key)?, Fill::Full) {
            return Ok(Decoded::Truncated);
        }

        let entry = Self {
            checksum,
            version,
            key,
            record_size,
            record_offset,
            sequence_number,
        };

        if entry.compute_checksum() != checksum {
            return Ok(Decoded::Corrupt(format!(
                "index entry checksum mismatch (sequence {})",
                sequence_number
            )));
        }

        Ok(Decoded::Complete(entry))
    }
}
