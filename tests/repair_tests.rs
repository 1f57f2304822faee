//! Tests for crash repair
//!
//! These tests verify:
//! - A torn last record is discarded and everything before it recovered
//! - A corrupt last record is discarded the same way
//! - Repair of an already repaired directory changes nothing
//! - Compacted files and tombstone files are repaired too
//! - The io-error flag forces repair just like an unclean shutdown
//! - Scratch files of an interrupted repair are removed on open

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::Path;

use emberkv::config::FlushPolicy;
use emberkv::engine::repair_latest_files;
use emberkv::record::{IndexFileEntry, RecordEntry};
use emberkv::storage::{
    data_file_path, index_file_path, list_data_files, list_tombstone_files, tombstone_file_path,
    DataFile, DbMetadata, FileKind, IndexFile,
};
use emberkv::{Config, Engine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config() -> Config {
    Config::builder()
        .max_file_size(4096)
        .compaction_disabled(true)
        .build()
}

/// Write `count` keys of 100-byte values and close the engine cleanly
fn setup_populated_dir(count: usize) -> TempDir {
    let temp = TempDir::new().unwrap();
    let engine = Engine::open(temp.path(), test_config()).unwrap();
    for i in 0..count {
        engine.put(format!("k{}", i).as_bytes(), &[i as u8; 100]).unwrap();
    }
    engine.close().unwrap();
    temp
}

/// Leave META as an unclean shutdown would
fn mark_unclean(dir: &Path) {
    let mut meta = DbMetadata::load(dir).unwrap().unwrap();
    meta.open = true;
    meta.store(dir).unwrap();
}

fn latest_plain_file(dir: &Path) -> (u32, std::path::PathBuf) {
    let (id, kind) = *list_data_files(dir)
        .unwrap()
        .iter()
        .rev()
        .find(|(_, kind)| *kind == FileKind::Plain)
        .unwrap();
    (id, data_file_path(dir, id, kind))
}

fn truncate_by(path: &Path, bytes: u64) {
    let len = fs::metadata(path).unwrap().len();
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len - bytes).unwrap();
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

// =============================================================================
// Crash Simulation Tests
// =============================================================================

#[test]
fn test_torn_last_record_is_discarded() {
    let temp = setup_populated_dir(10);
    let (id, path) = latest_plain_file(temp.path());
    truncate_by(&path, 50);
    mark_unclean(temp.path());

    let engine = Engine::open(temp.path(), test_config()).unwrap();

    assert_eq!(engine.size(), 9);
    for i in 0..9 {
        assert_eq!(
            engine.get(format!("k{}", i).as_bytes()).unwrap(),
            Some(vec![i as u8; 100])
        );
    }
    assert_eq!(engine.get(b"k9").unwrap(), None);

    // 9 records of 18 + 2 + 100 bytes survive, index matches
    assert_eq!(fs::metadata(&path).unwrap().len(), 9 * 120);
    assert_eq!(
        fs::metadata(index_file_path(temp.path(), id)).unwrap().len(),
        9 * (IndexFileEntry::HEADER_SIZE as u64 + 2)
    );

    // new writes still land after the recovered prefix
    engine.put(b"k9", b"rewritten").unwrap();
    assert_eq!(engine.get(b"k9").unwrap(), Some(b"rewritten".to_vec()));
}

#[test]
fn test_corrupt_last_record_is_discarded() {
    let temp = setup_populated_dir(5);
    let (_, path) = latest_plain_file(temp.path());

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();
    mark_unclean(temp.path());

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    assert_eq!(engine.size(), 4);
    assert_eq!(engine.get(b"k4").unwrap(), None);
    assert_eq!(engine.get(b"k3").unwrap(), Some(vec![3u8; 100]));
}

#[test]
fn test_only_newest_file_is_touched() {
    // 120-byte records, 34 per 4 KiB file
    let temp = setup_populated_dir(80);
    let files = list_data_files(temp.path()).unwrap();
    assert!(files.len() >= 3);

    let before = snapshot(temp.path());
    let (latest, path) = latest_plain_file(temp.path());
    truncate_by(&path, 1);
    mark_unclean(temp.path());

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    assert_eq!(engine.size(), 79);
    drop(engine);

    let after = snapshot(temp.path());
    for (id, _) in files.iter().filter(|(id, _)| *id != latest) {
        let name = format!("{}.data", id);
        assert_eq!(before[&name], after[&name], "{} changed", name);
    }
}

#[test]
fn test_io_error_flag_forces_repair() {
    let temp = setup_populated_dir(3);
    let (_, path) = latest_plain_file(temp.path());
    truncate_by(&path, 10);

    let mut meta = DbMetadata::load(temp.path()).unwrap().unwrap();
    meta.io_error = true;
    meta.store(temp.path()).unwrap();

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    assert_eq!(engine.size(), 2);
    assert!(!DbMetadata::load(temp.path()).unwrap().unwrap().io_error);
}

#[test]
fn test_clean_shutdown_skips_repair() {
    let temp = setup_populated_dir(3);
    let (_, path) = latest_plain_file(temp.path());
    let before = fs::metadata(&path).unwrap().len();

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    assert_eq!(engine.size(), 3);
    assert_eq!(fs::metadata(&path).unwrap().len(), before);
}

// =============================================================================
// Idempotence Tests
// =============================================================================

#[test]
fn test_repair_twice_changes_nothing() {
    let temp = setup_populated_dir(10);
    let (_, path) = latest_plain_file(temp.path());
    truncate_by(&path, 7);

    let first = repair_latest_files(temp.path()).unwrap();
    assert!(first.iter().any(|report| report.rewritten && report.discarded_bytes > 0));
    let repaired = snapshot(temp.path());

    let second = repair_latest_files(temp.path()).unwrap();
    assert!(second.iter().all(|report| !report.rewritten && report.discarded_bytes == 0));
    assert_eq!(snapshot(temp.path()), repaired);
}

#[test]
fn test_repair_restores_short_index() {
    let temp = setup_populated_dir(6);
    let (id, _) = latest_plain_file(temp.path());
    truncate_by(&index_file_path(temp.path(), id), 30);
    mark_unclean(temp.path());

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    assert_eq!(engine.size(), 6);
}

// =============================================================================
// Compacted / Tombstone File Tests
// =============================================================================

#[test]
fn test_compacted_file_is_repaired() {
    let temp = setup_populated_dir(1);
    let id = 50;
    {
        let data = DataFile::create(temp.path(), id, FileKind::Compacted, FlushPolicy::OsDeferred)
            .unwrap();
        let index = IndexFile::create(temp.path(), id, FlushPolicy::OsDeferred).unwrap();
        for i in 0..4u64 {
            let record =
                RecordEntry::new(format!("c{}", i).into_bytes(), b"copied".to_vec(), 1 + i).unwrap();
            let offset = data.append(&record).unwrap();
            let entry = IndexFileEntry::new(
                record.key.clone(),
                record.record_size() as u32,
                offset as u32,
                record.sequence_number(),
            )
            .unwrap();
            index.append(&entry).unwrap();
        }
        data.flush().unwrap();
        index.flush().unwrap();
    }

    let path = data_file_path(temp.path(), id, FileKind::Compacted);
    truncate_by(&path, 3);

    let reports = repair_latest_files(temp.path()).unwrap();
    let report = reports.iter().find(|report| report.path == path).unwrap();
    assert!(report.rewritten);
    assert_eq!(report.entries, 3);
    assert!(report.discarded_bytes > 0);
}

#[test]
fn test_torn_tombstone_tail_is_repaired() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp.path(), test_config()).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.delete(b"a").unwrap();
        engine.delete(b"b").unwrap();
    }

    let id = *list_tombstone_files(temp.path()).unwrap().last().unwrap();
    let path = tombstone_file_path(temp.path(), id);
    truncate_by(&path, 2);
    mark_unclean(temp.path());

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    // the delete of "b" was torn, so "b" comes back; "a" stays deleted
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(fs::metadata(&path).unwrap().len(), 15);
}

#[test]
fn test_leftover_scratch_files_are_removed() {
    let temp = setup_populated_dir(2);
    let scratch = temp.path().join("1.data.repair");
    fs::write(&scratch, b"half written").unwrap();

    let engine = Engine::open(temp.path(), test_config()).unwrap();
    assert!(!scratch.exists());
    assert_eq!(engine.size(), 2);
}
