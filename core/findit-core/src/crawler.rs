use crate::error::{FinditError, Result};
use crate::probe::detect_filesystem;
use crate::scanner::{read_entries, EntryResult, FileMeta};
use crate::schema;
use crate::session::Session;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::{DirEntry, WalkDir};

const HIDDEN_DIR_ALLOWLIST: &[&str] = &[".local", ".config"];

#[derive(Debug)]
pub enum CrawlOutcome {
    Completed { indexed: u64 },
    /// Stopped at a cancellation poll. Entries buffered before the poll were
    /// still written.
    Cancelled { indexed: u64 },
    /// A write or commit failed. The open transaction was rolled back.
    Failed { error: FinditError },
}

impl CrawlOutcome {
    /// Files written by this crawl; zero on failure.
    pub fn indexed_count(&self) -> u64 {
        match self {
            CrawlOutcome::Completed { indexed } | CrawlOutcome::Cancelled { indexed } => *indexed,
            CrawlOutcome::Failed { .. } => 0,
        }
    }
}

/// Replace every File Record under `root` with a fresh snapshot of the tree.
///
/// `on_progress(files_so_far, last_path)` fires after each full batch commits,
/// with the session lock released and no transaction open, so writes made from
/// the callback are durable regardless of how the crawl ends.
///
/// One crawl per session at a time: a second call while one is running returns
/// `Failed` with [`FinditError::CrawlInProgress`] and leaves the store untouched.
pub fn index_path<P, F>(session: &Session, root: P, on_progress: F) -> CrawlOutcome
where
    P: AsRef<Path>,
    F: FnMut(u64, &str),
{
    let root = root.as_ref();
    let _guard = match session.begin_crawl() {
        Ok(guard) => guard,
        Err(error) => {
            tracing::warn!(root = %root.display(), "refusing to index: {error}");
            return CrawlOutcome::Failed { error };
        }
    };

    let root_key = root.to_string_lossy().to_string();
    let mut crawl = Crawl {
        session,
        root_key,
        fs_type: detect_filesystem(root),
        indexed_at: unix_now(),
        indexed: 0,
        skipped: 0,
        in_transaction: false,
        on_progress,
    };

    tracing::info!(root = %root.display(), fs_type = %crawl.fs_type, "indexing");

    let result = crawl.prepare().and_then(|()| crawl.walk(root));
    match result {
        Ok(cancelled) => {
            tracing::info!(
                root = %root.display(),
                indexed = crawl.indexed,
                skipped = crawl.skipped,
                cancelled,
                "indexing finished"
            );
            if cancelled {
                CrawlOutcome::Cancelled {
                    indexed: crawl.indexed,
                }
            } else {
                CrawlOutcome::Completed {
                    indexed: crawl.indexed,
                }
            }
        }
        Err(error) => {
            tracing::warn!(root = %root.display(), "indexing failed, rolling back: {error}");
            crawl.abort();
            CrawlOutcome::Failed { error }
        }
    }
}

struct Crawl<'a, F> {
    session: &'a Session,
    root_key: String,
    fs_type: String,
    indexed_at: i64,
    indexed: u64,
    skipped: u64,
    // Set only while a transaction this crawl began is open.
    in_transaction: bool,
    on_progress: F,
}

impl<F: FnMut(u64, &str)> Crawl<'_, F> {
    fn prepare(&mut self) -> Result<()> {
        let session = self.session;
        let conn = session.lock()?;
        let removed = conn.execute(
            "DELETE FROM files WHERE substr(path, 1, length(?1)) = ?1",
            params![self.root_key],
        )?;
        tracing::debug!(root = %self.root_key, removed, "cleared previous records");

        schema::drop_lookup_indexes(&conn)?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Returns whether the walk stopped on cancellation.
    fn walk(&mut self, root: &Path) -> Result<bool> {
        let settings = *self.session.settings();
        let batch_size = settings.batch_size.max(1);
        let interval = settings.cancel_check_interval.max(1);

        let walker = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !(settings.skip_hidden_dirs && is_hidden_dir(entry)));

        let mut pending: Vec<PathBuf> = Vec::with_capacity(batch_size);
        let mut visited = 0usize;
        let mut cancelled = false;

        for entry in walker {
            visited += 1;
            if visited % interval == 0 && self.session.is_cancelled() {
                cancelled = true;
                break;
            }

            match entry {
                Ok(entry) => pending.push(entry.into_path()),
                Err(err) if err.depth() == 0 => {
                    tracing::warn!(root = %root.display(), "cannot enumerate root: {err}");
                    break;
                }
                Err(err) => {
                    tracing::debug!("skipping unreadable entry: {err}");
                    self.skipped += 1;
                }
            }

            if pending.len() >= batch_size {
                self.write_batch(&mut pending, false)?;
            }
        }

        self.write_batch(&mut pending, true)?;
        self.finish()?;
        Ok(cancelled)
    }

    fn write_batch(&mut self, pending: &mut Vec<PathBuf>, last: bool) -> Result<()> {
        let records: Vec<FileMeta> = read_entries(self.session.stat_pool(), pending)
            .into_iter()
            .filter_map(|entry| match entry {
                EntryResult::Record(meta) => Some(meta),
                EntryResult::Skipped { path, reason } => {
                    tracing::debug!(path = %path.display(), "skipping entry: {reason}");
                    self.skipped += 1;
                    None
                }
            })
            .collect();
        pending.clear();

        self.indexed += records.iter().filter(|meta| !meta.is_directory).count() as u64;

        {
            let session = self.session;
            let conn = session.lock()?;
            if !self.in_transaction {
                conn.execute_batch("BEGIN")?;
                self.in_transaction = true;
            }
            insert_records(&conn, &records, &self.fs_type, self.indexed_at)?;
            conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        tracing::debug!(records = records.len(), indexed = self.indexed, "committed batch");

        if !last {
            if let Some(meta) = records.last() {
                (self.on_progress)(self.indexed, &meta.path);
            }
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        let conn = self.session.lock()?;
        schema::create_lookup_indexes(&conn)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute(
            "UPDATE mount_points SET last_indexed = ?1 WHERE path = ?2",
            params![self.indexed_at, self.root_key],
        )?;
        Ok(())
    }

    /// Leave the store queryable after a failed crawl, even if incomplete.
    fn abort(&self) {
        let conn = match self.session.lock() {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!("cannot restore store after failed crawl: {err}");
                return;
            }
        };
        if self.in_transaction && !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("rollback failed: {err}");
            }
        }
        if let Err(err) = schema::create_lookup_indexes(&conn) {
            tracing::warn!("failed to rebuild lookup indexes: {err}");
        }
        if let Err(err) = conn.pragma_update(None, "synchronous", "NORMAL") {
            tracing::warn!("failed to restore synchronous mode: {err}");
        }
    }
}

fn insert_records(
    conn: &Connection,
    records: &[FileMeta],
    fs_type: &str,
    indexed_at: i64,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO files (path, filename, extension, size, modified, is_directory, filesystem_type, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for meta in records {
        stmt.execute(params![
            meta.path,
            meta.filename,
            meta.extension,
            meta.size as i64,
            meta.modified,
            meta.is_directory,
            fs_type,
            indexed_at,
        ])?;
    }
    Ok(())
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') && !HIDDEN_DIR_ALLOWLIST.contains(&name.as_ref())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs() as i64)
        .unwrap_or_default()
}
