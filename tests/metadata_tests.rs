//! Tests for the META witness file

use std::fs;

use emberkv::storage::{DbMetadata, META_FILENAME};
use emberkv::EmberError;
use tempfile::TempDir;

fn sample() -> DbMetadata {
    DbMetadata {
        version: DbMetadata::FORMAT_VERSION,
        open: true,
        sequence_number: 0x0102_0304_0506_0708,
        io_error: false,
        max_file_size: 4096,
    }
}

#[test]
fn test_encoding_is_19_bytes_big_endian() {
    let bytes = sample().encode();

    assert_eq!(bytes.len(), DbMetadata::SIZE);
    assert_eq!(bytes[4], DbMetadata::FORMAT_VERSION);
    assert_eq!(bytes[5], 1);
    assert_eq!(&bytes[6..14], &0x0102_0304_0506_0708u64.to_be_bytes());
    assert_eq!(bytes[14], 0);
    assert_eq!(&bytes[15..19], &4096u32.to_be_bytes());
    assert_eq!(&bytes[..4], &crc32fast::hash(&bytes[4..]).to_be_bytes());
}

#[test]
fn test_load_missing_is_none() {
    let temp = TempDir::new().unwrap();
    assert_eq!(DbMetadata::load(temp.path()).unwrap(), None);
}

#[test]
fn test_store_then_load() {
    let temp = TempDir::new().unwrap();
    sample().store(temp.path()).unwrap();

    assert_eq!(DbMetadata::load(temp.path()).unwrap(), Some(sample()));
    assert!(!temp.path().join("META.tmp").exists());

    let updated = DbMetadata {
        open: false,
        io_error: true,
        ..sample()
    };
    updated.store(temp.path()).unwrap();
    assert_eq!(DbMetadata::load(temp.path()).unwrap(), Some(updated));
}

#[test]
fn test_corrupt_meta_is_rejected() {
    let temp = TempDir::new().unwrap();
    sample().store(temp.path()).unwrap();

    let path = temp.path().join(META_FILENAME);
    let mut bytes = fs::read(&path).unwrap();
    bytes[10] ^= 0x01;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(DbMetadata::load(temp.path()), Err(EmberError::Corrupt(_))));

    fs::write(&path, &bytes[..12]).unwrap();
    assert!(matches!(DbMetadata::load(temp.path()), Err(EmberError::Corrupt(_))));
}
