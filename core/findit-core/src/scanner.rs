use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Metadata for one filesystem entry, as stored in a File Record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileMeta {
    pub path: String,
    pub filename: String,
    /// Lower-cased, with its leading dot; empty for directories and dotless names.
    pub extension: String,
    pub size: u64,
    pub modified: i64,
    pub is_directory: bool,
}

/// Outcome of reading one discovered entry. A skip is a normal result, not an
/// error: the crawl logs it and moves on.
#[derive(Debug)]
pub enum EntryResult {
    Record(FileMeta),
    Skipped { path: PathBuf, reason: io::Error },
}

pub fn build_meta(path: &Path) -> io::Result<FileMeta> {
    let metadata = fs::metadata(path)?;
    let is_directory = metadata.is_dir();

    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = if is_directory {
        String::new()
    } else {
        path.extension()
            .map(|s| format!(".{}", s.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    };

    let modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|dur| dur.as_secs() as i64)
        .unwrap_or_default();

    Ok(FileMeta {
        path: path.to_string_lossy().to_string(),
        filename,
        extension,
        size: if is_directory { 0 } else { metadata.len() },
        modified,
        is_directory,
    })
}

/// Stat a batch of discovered paths on `pool`, preserving input order.
pub fn read_entries(pool: &rayon::ThreadPool, paths: &[PathBuf]) -> Vec<EntryResult> {
    pool.install(|| {
        paths
            .par_iter()
            .map(|path| match build_meta(path) {
                Ok(meta) => EntryResult::Record(meta),
                Err(reason) => EntryResult::Skipped {
                    path: path.clone(),
                    reason,
                },
            })
            .collect()
    })
}
