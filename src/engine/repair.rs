//! Crash repair
//!
//! Only the newest file of each kind can have an unsealed tail: every older
//! file was flushed at rollover. For each of those files, the valid prefix
//! is copied into `*.repair` scratch files which are then renamed over the
//! originals. A file whose tail is already clean and whose index matches
//! its records is left untouched, so repeating repair changes nothing.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::{IndexFileEntry, RecordEntry, TombstoneEntry};
use crate::storage::{
    data_file_path, index_file_path, list_data_files, list_tombstone_files, repair_path,
    sync_dir, tombstone_file_path, FileKind, FrameIter, TailState,
};

/// Outcome of repairing a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub path: PathBuf,
    /// Frames kept
    pub entries: u64,
    /// Bytes dropped from the tail
    pub discarded_bytes: u64,
    /// False if the file was already consistent and left as is
    pub rewritten: bool,
}

/// Repair the newest `.data`, `.datac` and `.tombstone` files in `dir`
pub fn repair_latest_files(dir: &Path) -> Result<Vec<RepairReport>> {
    let data_files = list_data_files(dir)?;
    let mut reports = Vec::new();

    for kind in [FileKind::Plain, FileKind::Compacted] {
        let latest = data_files
            .iter()
            .rev()
            .find(|&&(_, k)| k == kind)
            .map(|&(id, _)| id);

        if let Some(id) = latest {
            let report = repair_data_file(dir, id, kind)?;
            tracing::info!(
                path = %report.path.display(),
                entries = report.entries,
                discarded_bytes = report.discarded_bytes,
                rewritten = report.rewritten,
                "repaired data file"
            );
            reports.push(report);
        }
    }

    if let Some(&id) = list_tombstone_files(dir)?.last() {
        let report = repair_tombstone_file(dir, id)?;
        tracing::info!(
            path = %report.path.display(),
            entries = report.entries,
            discarded_bytes = report.discarded_bytes,
            rewritten = report.rewritten,
            "repaired tombstone file"
        );
        reports.push(report);
    }

    Ok(reports)
}

/// Rebuild `{id}.data` / `{id}.datac` and its index file from the valid
/// record prefix of the data file
pub fn repair_data_file(dir: &Path, id: u32, kind: FileKind) -> Result<RepairReport> {
    let data_path = data_file_path(dir, id, kind);
    let index_path = index_file_path(dir, id);
    let original_len = fs::metadata(&data_path)?.len();

    let mut records = FrameIter::<RecordEntry>::new(data_path.clone(), File::open(&data_path)?);
    let mut index_bytes = Vec::new();
    let mut entries = 0;

    for item in records.by_ref() {
        let (offset, record) = item?;
        let index_entry = IndexFileEntry::with_version(
            record.key.clone(),
            record.record_size() as u32,
            offset as u32,
            record.sequence_number(),
            record.header.version,
        )?;
        index_bytes.extend_from_slice(&index_entry.encode());
        entries += 1;
    }

    let valid_len = records.valid_len();
    let report = RepairReport {
        path: data_path.clone(),
        entries,
        discarded_bytes: original_len - valid_len,
        rewritten: false,
    };

    let clean = *records.tail() == TailState::Clean && valid_len == original_len;
    if clean && index_path.exists() && fs::read(&index_path)? == index_bytes {
        return Ok(report);
    }

    let data_scratch = repair_path(&data_path);
    let index_scratch = repair_path(&index_path);
    copy_prefix(&data_path, &data_scratch, valid_len)?;
    write_scratch(&index_scratch, &index_bytes)?;
    fs::rename(&data_scratch, &data_path)?;
    fs::rename(&index_scratch, &index_path)?;
    sync_dir(dir)?;

    Ok(RepairReport {
        rewritten: true,
        ..report
    })
}

/// Truncate `{id}.tombstone` to its valid prefix
pub fn repair_tombstone_file(dir: &Path, id: u32) -> Result<RepairReport> {
    let path = tombstone_file_path(dir, id);
    let original_len = fs::metadata(&path)?.len();

    let mut tombstones = FrameIter::<TombstoneEntry>::new(path.clone(), File::open(&path)?);
    let mut entries = 0;

    for item in tombstones.by_ref() {
        item?;
        entries += 1;
    }

    let valid_len = tombstones.valid_len();
    let report = RepairReport {
        path: path.clone(),
        entries,
        discarded_bytes: original_len - valid_len,
        rewritten: false,
    };

    if *tombstones.tail() == TailState::Clean && valid_len == original_len {
        return Ok(report);
    }

    let scratch = repair_path(&path);
    copy_prefix(&path, &scratch, valid_len)?;
    fs::rename(&scratch, &path)?;
    sync_dir(dir)?;

    Ok(RepairReport {
        rewritten: true,
        ..report
    })
}

fn write_scratch(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = create_scratch(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Copy the first `len` bytes of `source` into a fresh scratch file
fn copy_prefix(source: &Path, scratch: &Path, len: u64) -> Result<()> {
    let mut reader = File::open(source)?.take(len);
    let mut writer = BufWriter::new(create_scratch(scratch)?);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn create_scratch(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}
