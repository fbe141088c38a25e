mod crawler;
mod error;
pub mod ffi;
mod mounts;
mod probe;
mod query;
mod scanner;
mod schema;
mod session;

pub use crate::crawler::CrawlOutcome;
pub use crate::error::{FinditError, Result};
pub use crate::mounts::{IndexStats, MountPoint};
pub use crate::probe::{detect_filesystem, list_system_mounts, parse_mounts, SystemMount};
pub use crate::query::{FileTypeFilter, SearchHit, SearchQuery, SearchTarget};
pub use crate::scanner::{build_meta, EntryResult, FileMeta};
pub use crate::session::{Session, SessionSettings};

use std::path::Path;

pub fn index_path<P, F>(session: &Session, root: P, on_progress: F) -> CrawlOutcome
where
    P: AsRef<Path>,
    F: FnMut(u64, &str),
{
    crawler::index_path(session, root, on_progress)
}

pub fn search(session: &Session, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    query::search(session, query)
}

pub fn register_mount_point(session: &Session, path: &str, fs_type: &str) -> Result<bool> {
    mounts::register_mount_point(session, path, fs_type)
}

pub fn list_mount_points(session: &Session) -> Result<Vec<MountPoint>> {
    mounts::list_mount_points(session)
}

pub fn remove_mount_point(session: &Session, path: &str) -> Result<bool> {
    mounts::remove_mount_point(session, path)
}

pub fn set_mount_point_enabled(session: &Session, path: &str, enabled: bool) -> Result<bool> {
    mounts::set_mount_point_enabled(session, path, enabled)
}

pub fn get_stats(session: &Session) -> Result<IndexStats> {
    mounts::get_stats(session)
}
