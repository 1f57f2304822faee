//! Data file records
//!
//! ```text
//! ┌──────────┬────────────┬────────────┬─────────────┬──────────┬─────┬───────┐
//! │ CRC (4)  │ Ver|KeyHi  │ KeyLo (1)  │ ValSize (4) │ Seq (8)  │ Key │ Value │
//! │          │ (1)        │            │             │          │     │       │
//! └──────────┴────────────┴────────────┴─────────────┴──────────┴─────┴───────┘
//! ```
//! The CRC covers everything after itself, including key and value.

use std::io::Read;

use bytes::{Buf, BufMut};

use crate::error::{EmberError, Result};

use super::{
    fill_buf, pack_version_and_key_size, unpack_version_and_key_size, validate_key_size,
    validate_version, Decoded, Fill, CURRENT_VERSION, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

/// A logical key/value pair as handed out by iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Fixed-size header in front of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u32,
    pub version: u8,
    pub key_size: u16,
    pub value_size: u32,
    pub sequence_number: u64,
}

impl RecordHeader {
    /// Decode a header without verifying the checksum (the body is needed for that)
    pub fn decode(bytes: &[u8; RecordEntry::HEADER_SIZE]) -> Decoded<Self> {
        let mut buf = &bytes[..];
        let checksum = buf.get_u32();
        let (version, key_size) = unpack_version_and_key_size(buf.get_u8(), buf.get_u8());
        let value_size = buf.get_u32();
        let sequence_number = buf.get_u64();

        if value_size as usize > MAX_VALUE_SIZE {
            return Decoded::Corrupt(format!("value size {} out of range", value_size));
        }

        Decoded::Complete(Self {
            checksum,
            version,
            key_size,
            value_size,
            sequence_number,
        })
    }

    fn encode_without_checksum(&self) -> [u8; RecordEntry::HEADER_SIZE - 4] {
        let mut out = [0u8; RecordEntry::HEADER_SIZE - 4];
        let mut buf = &mut out[..];
        buf.put_slice(&pack_version_and_key_size(self.version, self.key_size));
        buf.put_u32(self.value_size);
        buf.put_u64(self.sequence_number);
        out
    }

    /// Size of key + value following this header
    pub fn body_size(&self) -> usize {
        self.key_size as usize + self.value_size as usize
    }

    /// Size of the whole framed record
    pub fn record_size(&self) -> usize {
        RecordEntry::HEADER_SIZE + self.body_size()
    }
}

/// A record as framed in a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub header: RecordHeader,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RecordEntry {
    /// CRC (4) + version/key (2) + value size (4) + sequence (8)
    pub const HEADER_SIZE: usize = 18;

    /// Upfront allocation cap when reading a value of unverified size
    const READ_CHUNK: usize = 64 * 1024;

    /// Build a record with the current format version
    pub fn new(key: Vec<u8>, value: Vec<u8>, sequence_number: u64) -> Result<Self> {
        Self::with_version(key, value, sequence_number, CURRENT_VERSION)
    }

    /// Build a record with an explicit format version
    pub fn with_version(
        key: Vec<u8>,
        value: Vec<u8>,
        sequence_number: u64,
        version: u8,
    ) -> Result<Self> {
        validate_version(version)?;
        validate_key_size(key.len(), MAX_KEY_SIZE)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(EmberError::InvalidRecord(format!(
                "value size {} exceeds {}",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }

        let mut header = RecordHeader {
            checksum: 0,
            version,
            key_size: key.len() as u16,
            value_size: value.len() as u32,
            sequence_number,
        };
        header.checksum = Self::compute_checksum(&header, &key, &value);

        Ok(Self { header, key, value })
    }

    fn compute_checksum(header: &RecordHeader, key: &[u8], value: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header.encode_without_checksum());
        hasher.update(key);
        hasher.update(value);
        hasher.finalize()
    }

    /// Total bytes this record occupies on disk
    pub fn record_size(&self) -> usize {
        self.header.record_size()
    }

    /// Offset of the value relative to the start of the record
    pub fn value_offset(&self) -> usize {
        Self::HEADER_SIZE + self.key.len()
    }

    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    /// Serialize header, key and value into one buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.record_size());
        buf.put_u32(self.header.checksum);
        buf.put_slice(&self.header.encode_without_checksum());
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        buf
    }

    /// Decode a record from the front of `bytes`
    pub fn decode(bytes: &[u8]) -> Decoded<Self> {
        let mut reader = bytes;
        match Self::read_from(&mut reader) {
            Ok(decoded) => decoded,
            Err(e) => Decoded::Corrupt(e.to_string()),
        }
    }

    /// Read the next record from a sequential stream.
    ///
    /// I/O errors other than end-of-file are returned as errors.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Decoded<Self>> {
        let mut header_bytes = [0u8; Self::HEADER_SIZE];
        match fill_buf(reader, &mut header_bytes)? {
            Fill::Empty => return Ok(Decoded::End),
            Fill::Partial => return Ok(Decoded::Truncated),
            Fill::Full => {}
        }

        let header = match RecordHeader::decode(&header_bytes) {
            Decoded::Complete(header) => header,
            Decoded::Corrupt(reason) => return Ok(Decoded::Corrupt(reason)),
            Decoded::End | Decoded::Truncated => return Ok(Decoded::Truncated),
        };

        let mut key = vec![0u8; header.key_size as usize];
        if !matches!(fill_buf(reader, &mut key)?, Fill::Full) {
            return Ok(Decoded::Truncated);
        }

        // a torn header can claim a huge value; only grow as bytes arrive
        let value_size = header.value_size as usize;
        let mut value = Vec::with_capacity(value_size.min(Self::READ_CHUNK));
        (&mut *reader).take(value_size as u64).read_to_end(&mut value)?;
        if value.len() < value_size {
            return Ok(Decoded::Truncated);
        }

        if Self::compute_checksum(&header, &key, &value) != header.checksum {
            return Ok(Decoded::Corrupt(format!(
                "record checksum mismatch (sequence {})",
                header.sequence_number
            )));
        }

        Ok(Decoded::Complete(Self { header, key, value }))
    }
}
