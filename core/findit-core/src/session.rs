use crate::error::{FinditError, Result};
use crate::schema;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_BATCH_SIZE: usize = 10_000;
const DEFAULT_CANCEL_CHECK_INTERVAL: usize = 500;
const DEFAULT_REGEX_OVERSAMPLE: usize = 10;
const DEFAULT_CACHE_SIZE_KIB: i64 = 64 * 1024;
const DEFAULT_MMAP_SIZE_BYTES: i64 = 256 * 1024 * 1024;
const DEFAULT_STAT_THREADS: usize = 0; // will be replaced with num_cpus at runtime

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub batch_size: usize,
    pub cancel_check_interval: usize,
    pub regex_oversample: usize,
    pub cache_size_kib: i64,
    pub mmap_size_bytes: i64,
    pub stat_threads: usize,
    pub skip_hidden_dirs: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cancel_check_interval: DEFAULT_CANCEL_CHECK_INTERVAL,
            regex_oversample: DEFAULT_REGEX_OVERSAMPLE,
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            mmap_size_bytes: DEFAULT_MMAP_SIZE_BYTES,
            stat_threads: DEFAULT_STAT_THREADS,
            skip_hidden_dirs: false,
        }
    }
}

/// One open store plus the lock and cancellation flag guarding it.
///
/// Every storage access goes through [`Session::lock`]; the connection itself
/// is never handed out past the guard's lifetime.
pub struct Session {
    conn: Mutex<Connection>,
    cancel: AtomicBool,
    crawling: AtomicBool,
    settings: SessionSettings,
    stat_pool: rayon::ThreadPool,
    store_path: PathBuf,
}

impl Session {
    pub fn create<P: AsRef<Path>>(store_path: P) -> Result<Session> {
        Self::create_with_settings(store_path, SessionSettings::default())
    }

    pub fn create_with_settings<P: AsRef<Path>>(
        store_path: P,
        settings: SessionSettings,
    ) -> Result<Session> {
        let store_path = store_path.as_ref();
        Self::open(store_path, settings).map_err(|err| FinditError::store_init(store_path, err))
    }

    fn open(store_path: &Path, settings: SessionSettings) -> Result<Session> {
        if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(store_path)?;
        configure_connection(&conn, &settings)?;
        schema::create_tables(&conn)?;

        let threads = if settings.stat_threads == 0 {
            num_cpus::get().max(1)
        } else {
            settings.stat_threads
        };
        let stat_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("findit-stat-{i}"))
            .build()?;

        tracing::info!(store = %store_path.display(), "opened index store");

        Ok(Session {
            conn: Mutex::new(conn),
            cancel: AtomicBool::new(false),
            crawling: AtomicBool::new(false),
            settings,
            stat_pool,
            store_path: store_path.to_path_buf(),
        })
    }

    /// Close the connection, surfacing any error the store reports on close.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().map_err(|_| FinditError::LockPoisoned)?;
        conn.close().map_err(|(_, err)| FinditError::Storage(err))?;
        tracing::info!(store = %self.store_path.display(), "closed index store");
        Ok(())
    }

    /// Request (or withdraw a request) that an in-progress crawl stop. Observed
    /// at the crawler's next poll, not immediately.
    pub fn set_cancellation(&self, flag: bool) {
        self.cancel.store(flag, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_crawling(&self) -> bool {
        self.crawling.load(Ordering::SeqCst)
    }

    /// Claim the session for one crawl. Released when the guard drops.
    pub(crate) fn begin_crawl(&self) -> Result<CrawlGuard<'_>> {
        if self.crawling.swap(true, Ordering::SeqCst) {
            return Err(FinditError::CrawlInProgress);
        }
        Ok(CrawlGuard {
            flag: &self.crawling,
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub(crate) fn stat_pool(&self) -> &rayon::ThreadPool {
        &self.stat_pool
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| FinditError::LockPoisoned)
    }
}

pub(crate) struct CrawlGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CrawlGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn configure_connection(conn: &Connection, settings: &SessionSettings) -> rusqlite::Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -settings.cache_size_kib)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update_and_check(None, "mmap_size", settings.mmap_size_bytes, |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("nested/deeper/index.db");

        let session = Session::create(&store).unwrap();
        assert!(store.exists());
        assert_eq!(session.store_path(), store.as_path());
        session.close().unwrap();
    }

    #[test]
    fn configures_wal_journal() {
        let dir = tempdir().unwrap();
        let session = Session::create(dir.path().join("index.db")).unwrap();
        let mode: String = session
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn reopening_existing_store_keeps_rows() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("index.db");

        let session = Session::create(&store).unwrap();
        session
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO mount_points (path, filesystem_type) VALUES ('/data', 'ext4')",
                [],
            )
            .unwrap();
        session.close().unwrap();

        let reopened = Session::create(&store).unwrap();
        let count: i64 = reopened
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM mount_points", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let err = Session::create(blocker.join("index.db")).err().unwrap();
        assert!(matches!(err, FinditError::StoreInit { .. }));
    }

    #[test]
    fn cancellation_flag_toggles() {
        let dir = tempdir().unwrap();
        let session = Session::create(dir.path().join("index.db")).unwrap();
        assert!(!session.is_cancelled());
        session.set_cancellation(true);
        assert!(session.is_cancelled());
        session.set_cancellation(false);
        assert!(!session.is_cancelled());
    }

    #[test]
    fn crawl_guard_is_exclusive_until_dropped() {
        let dir = tempdir().unwrap();
        let session = Session::create(dir.path().join("index.db")).unwrap();

        let guard = session.begin_crawl().unwrap();
        assert!(session.is_crawling());
        assert!(matches!(
            session.begin_crawl().err().unwrap(),
            FinditError::CrawlInProgress
        ));

        drop(guard);
        assert!(!session.is_crawling());
        assert!(session.begin_crawl().is_ok());
    }
}
