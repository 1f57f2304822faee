//! Tests for background compaction
//!
//! These tests verify:
//! - A file crossing the stale threshold is compacted and deleted
//! - Live records survive compaction, in memory and across reopen
//! - Deleted keys are never resurrected by compaction
//! - Concurrent puts always win over records being moved
//! - Readers never miss a key while its file is retired
//! - Pause / resume and startup scheduling of already stale files

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use emberkv::compaction::CompactionState;
use emberkv::storage::{data_file_path, index_file_path, list_data_files, FileKind};
use emberkv::{Config, Engine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const FILE_SIZE: u32 = 4096;

/// 18-byte header + 2-byte key + 100-byte value
const RECORD_SIZE: usize = 120;

fn compaction_config() -> Config {
    Config::builder()
        .max_file_size(FILE_SIZE)
        .compaction_threshold_per_file(0.5)
        .compaction_job_rate_bytes_per_sec(64 * 1024 * 1024)
        .build()
}

fn setup_temp_engine(config: Config) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), config).unwrap();
    (temp_dir, engine)
}

fn wait_for_compaction(engine: &Engine) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !engine.is_compaction_idle() {
        assert!(Instant::now() < deadline, "compaction did not finish");
        thread::sleep(Duration::from_millis(10));
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("{:02}", i).into_bytes()
}

fn value(tag: u8) -> Vec<u8> {
    vec![tag; RECORD_SIZE - 18 - 2]
}

// =============================================================================
// Stale Accounting Tests
// =============================================================================

#[test]
fn test_overwritten_file_is_compacted_away() {
    let (temp, engine) = setup_temp_engine(compaction_config());

    // fills file 1 with versions of one key, then rolls into file 2
    let per_file = FILE_SIZE as usize / RECORD_SIZE;
    for round in 0..=per_file {
        engine.put(b"hk", &value(round as u8)).unwrap();
    }
    wait_for_compaction(&engine);

    assert!(!data_file_path(temp.path(), 1, FileKind::Plain).exists());
    assert!(!index_file_path(temp.path(), 1).exists());
    assert_eq!(engine.get(b"hk").unwrap(), Some(value(per_file as u8)));

    let stats = engine.stats();
    assert_eq!(stats.compaction.files_compacted, 1);
    assert_eq!(stats.compaction.records_copied, 0);
    assert!(!stats.stale_bytes_per_file.contains_key(&1));
}

#[test]
fn test_below_threshold_is_not_compacted() {
    let (temp, engine) = setup_temp_engine(compaction_config());

    for i in 0..34 {
        engine.put(&key(i), &value(1)).unwrap();
    }
    // a few overwrites land in file 2; file 1 stays below half stale
    for i in 0..5 {
        engine.put(&key(i), &value(2)).unwrap();
    }
    wait_for_compaction(&engine);

    assert!(data_file_path(temp.path(), 1, FileKind::Plain).exists());
    assert_eq!(engine.stats().stale_bytes_per_file[&1], 5 * RECORD_SIZE as u64);
}

// =============================================================================
// Live Data Tests
// =============================================================================

#[test]
fn test_live_records_survive_compaction_and_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp.path(), compaction_config()).unwrap();
        for i in 0..34 {
            engine.put(&key(i), &value(1)).unwrap();
        }
        for i in 0..20 {
            engine.put(&key(i), &value(2)).unwrap();
        }
        wait_for_compaction(&engine);

        assert!(!data_file_path(temp.path(), 1, FileKind::Plain).exists());
        let compacted: Vec<_> = list_data_files(temp.path())
            .unwrap()
            .into_iter()
            .filter(|(_, kind)| *kind == FileKind::Compacted)
            .collect();
        assert_eq!(compacted.len(), 1);

        // the file is queued before the last overwrites land, so a couple
        // of those keys may be copied too
        let stats = engine.stats();
        assert!(stats.compaction.records_copied >= 14);
        assert!(stats.compaction.records_replaced >= 14);
        assert_eq!(
            stats.compaction.bytes_copied,
            stats.compaction.records_copied * RECORD_SIZE as u64
        );

        for i in 0..34 {
            let expected = if i < 20 { value(2) } else { value(1) };
            assert_eq!(engine.get(&key(i)).unwrap(), Some(expected));
        }
    }

    let engine = Engine::open(temp.path(), compaction_config()).unwrap();
    assert_eq!(engine.size(), 34);
    for i in 0..34 {
        let expected = if i < 20 { value(2) } else { value(1) };
        assert_eq!(engine.get(&key(i)).unwrap(), Some(expected));
    }
    assert_eq!(engine.iter().count(), 34);
}

#[test]
fn test_deleted_keys_are_not_resurrected() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp.path(), compaction_config()).unwrap();
        for i in 0..34 {
            engine.put(&key(i), &value(1)).unwrap();
        }
        // roll over so file 1 is sealed, then delete most of it
        engine.put(b"zz", &value(9)).unwrap();
        for i in 0..30 {
            engine.delete(&key(i)).unwrap();
        }
        wait_for_compaction(&engine);

        assert!(!data_file_path(temp.path(), 1, FileKind::Plain).exists());
        for i in 0..30 {
            assert_eq!(engine.get(&key(i)).unwrap(), None);
        }
    }

    let engine = Engine::open(temp.path(), compaction_config()).unwrap();
    for i in 0..30 {
        assert_eq!(engine.get(&key(i)).unwrap(), None, "key {} came back", i);
    }
    for i in 30..34 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(1)));
    }
    assert_eq!(engine.size(), 5);
}

// =============================================================================
// Race Tests
// =============================================================================

#[test]
fn test_concurrent_puts_win_over_compaction() {
    // 500 B/s: the first four records fit the burst, every later one waits
    // about 0.2s between its freshness check and its index update
    let config = Config::builder()
        .max_file_size(FILE_SIZE)
        .compaction_threshold_per_file(0.5)
        .compaction_job_rate_bytes_per_sec(500)
        .build();
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(temp.path(), config.clone()).unwrap());
    engine.pause_compaction();

    for i in 0..34 {
        engine.put(&key(i), &value(1)).unwrap();
    }
    // file 1 is queued with keys 20..34 still live in it
    for i in 0..20 {
        engine.put(&key(i), &value(200)).unwrap();
    }
    assert!(engine.resume_compaction().unwrap());

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            // let the worker get past its first freshness checks
            thread::sleep(Duration::from_millis(50));
            for round in 2..40u8 {
                for i in 20..34 {
                    engine.put(&key(i), &value(round)).unwrap();
                }
                thread::sleep(Duration::from_millis(20));
            }
        })
    };

    writer.join().unwrap();
    wait_for_compaction(&engine);

    for i in 0..20 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(200)));
    }
    for i in 20..34 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(39)), "key {}", i);
    }

    let stats = engine.stats().compaction;
    assert!(stats.lost_races > 0, "no copy lost to a concurrent put: {:?}", stats);
    // every copy either moved its key or was written off as garbage
    assert_eq!(stats.records_copied, stats.records_replaced + stats.lost_races);
    assert_eq!(stats.bytes_copied, stats.records_copied * RECORD_SIZE as u64);

    let engine = Arc::try_unwrap(engine).ok().unwrap();
    engine.close().unwrap();
    drop(engine);

    let engine = Engine::open(temp.path(), config).unwrap();
    assert_eq!(engine.size(), 34);
    for i in 20..34 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(39)), "key {} after reopen", i);
    }
}

#[test]
fn test_reads_never_fail_while_files_are_retired() {
    let (_temp, engine) = setup_temp_engine(compaction_config());
    let engine = Arc::new(engine);

    let stable_key = |j: usize| format!("s{}", j).into_bytes();
    let stable_value = |j: usize| vec![j as u8; 100];

    let written = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let written = Arc::clone(&written);
            let stop = Arc::clone(&stop);
            let reads = Arc::clone(&reads);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    for j in 0..written.load(Ordering::SeqCst) {
                        let found = engine.get(&stable_key(j));
                        assert!(
                            matches!(&found, Ok(Some(v)) if *v == stable_value(j)),
                            "read of s{} returned {:?}",
                            j,
                            found.map(|v| v.map(|v| v.len()))
                        );
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    // each stable key lands in a file that churn makes mostly stale, so it
    // keeps being moved while the readers look it up
    for j in 0..20 {
        engine.put(&stable_key(j), &stable_value(j)).unwrap();
        written.store(j + 1, Ordering::SeqCst);
        for round in 0..10u8 {
            engine.put(b"hk", &value(round)).unwrap();
        }
    }
    wait_for_compaction(&engine);
    stop.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.join().unwrap();
    }

    let stats = engine.stats().compaction;
    assert!(stats.files_compacted > 0);
    assert!(stats.records_copied > 0);
    assert!(reads.load(Ordering::Relaxed) > 0);
    for j in 0..20 {
        assert_eq!(engine.get(&stable_key(j)).unwrap(), Some(stable_value(j)));
    }
}

// =============================================================================
// Control Tests
// =============================================================================

#[test]
fn test_pause_and_resume() {
    let (temp, engine) = setup_temp_engine(compaction_config());
    assert_eq!(engine.compaction_state(), CompactionState::Running);
    engine.pause_compaction();
    assert_eq!(engine.compaction_state(), CompactionState::Stopped);

    for i in 0..34 {
        engine.put(&key(i), &value(1)).unwrap();
    }
    for i in 0..34 {
        engine.put(&key(i), &value(2)).unwrap();
    }

    thread::sleep(Duration::from_millis(100));
    assert!(!engine.is_compaction_idle());
    assert!(data_file_path(temp.path(), 1, FileKind::Plain).exists());

    assert!(engine.resume_compaction().unwrap());
    assert!(!engine.resume_compaction().unwrap());
    assert_eq!(engine.compaction_state(), CompactionState::Running);
    wait_for_compaction(&engine);
    assert!(!data_file_path(temp.path(), 1, FileKind::Plain).exists());
}

#[test]
fn test_disabled_compaction_never_runs() {
    let config = Config::builder()
        .max_file_size(FILE_SIZE)
        .compaction_threshold_per_file(0.5)
        .compaction_disabled(true)
        .build();
    let (temp, engine) = setup_temp_engine(config);

    for round in 0..3u8 {
        for i in 0..34 {
            engine.put(&key(i), &value(round)).unwrap();
        }
    }

    assert!(engine.is_compaction_idle());
    assert_eq!(engine.compaction_state(), CompactionState::Stopped);
    assert!(!engine.resume_compaction().unwrap());
    assert!(data_file_path(temp.path(), 1, FileKind::Plain).exists());
}

#[test]
fn test_stale_files_are_compacted_at_startup() {
    let temp = TempDir::new().unwrap();
    {
        let config = Config::builder()
            .max_file_size(FILE_SIZE)
            .compaction_threshold_per_file(0.5)
            .compaction_disabled(true)
            .build();
        let engine = Engine::open(temp.path(), config).unwrap();
        for round in 0..2u8 {
            for i in 0..34 {
                engine.put(&key(i), &value(round)).unwrap();
            }
        }
    }
    assert!(data_file_path(temp.path(), 1, FileKind::Plain).exists());

    let engine = Engine::open(temp.path(), compaction_config()).unwrap();
    wait_for_compaction(&engine);

    assert!(!data_file_path(temp.path(), 1, FileKind::Plain).exists());
    for i in 0..34 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value(1)));
    }
}
