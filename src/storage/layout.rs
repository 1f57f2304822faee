//! Directory layout
//!
//! File naming and discovery. Ids are parsed from file names and returned
//! oldest first, which rebuild relies on.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the metadata witness file
pub const META_FILENAME: &str = "META";

const DATA_EXT: &str = ".data";
const COMPACTED_EXT: &str = ".datac";
const INDEX_EXT: &str = ".index";
const TOMBSTONE_EXT: &str = ".tombstone";
const REPAIR_EXT: &str = ".repair";

/// Which writer produced a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Written by put
    Plain,
    /// Written by the compaction worker
    Compacted,
}

impl FileKind {
    fn extension(self) -> &'static str {
        match self {
            FileKind::Plain => DATA_EXT,
            FileKind::Compacted => COMPACTED_EXT,
        }
    }
}

/// "{dir}/{id}.data" or "{dir}/{id}.datac"
pub fn data_file_path(dir: &Path, id: u32, kind: FileKind) -> PathBuf {
    dir.join(format!("{}{}", id, kind.extension()))
}

/// "{dir}/{id}.index"
pub fn index_file_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}", id, INDEX_EXT))
}

/// "{dir}/{id}.tombstone"
pub fn tombstone_file_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}", id, TOMBSTONE_EXT))
}

/// Scratch path a file is rebuilt into before being renamed over the original
pub fn repair_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(REPAIR_EXT);
    PathBuf::from(name)
}

/// Data files in `dir`, sorted by id ascending
pub fn list_data_files(dir: &Path) -> Result<Vec<(u32, FileKind)>> {
    let mut files = Vec::new();
    for name in file_names(dir)? {
        if let Some(id) = parse_id(&name, DATA_EXT) {
            files.push((id, FileKind::Plain));
        } else if let Some(id) = parse_id(&name, COMPACTED_EXT) {
            files.push((id, FileKind::Compacted));
        }
    }
    files.sort_by_key(|&(id, _)| id);
    Ok(files)
}

/// Index file ids in `dir`, sorted ascending
pub fn list_index_files(dir: &Path) -> Result<Vec<u32>> {
    list_ids(dir, INDEX_EXT)
}

/// Tombstone file ids in `dir`, sorted ascending
pub fn list_tombstone_files(dir: &Path) -> Result<Vec<u32>> {
    list_ids(dir, TOMBSTONE_EXT)
}

/// Delete "*.repair" files left behind by a crash during repair
pub fn remove_leftover_repair_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for name in file_names(dir)? {
        if name.ends_with(REPAIR_EXT) {
            fs::remove_file(dir.join(&name))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// fsync a directory so renames and deletions in it are durable
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn list_ids(dir: &Path, ext: &str) -> Result<Vec<u32>> {
    let mut ids: Vec<u32> = file_names(dir)?
        .iter()
        .filter_map(|name| parse_id(name, ext))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// "42.data" with ext ".data" → Some(42)
fn parse_id(name: &str, ext: &str) -> Option<u32> {
    let stem = name.strip_suffix(ext)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
