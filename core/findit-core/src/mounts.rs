use crate::error::Result;
use crate::probe::detect_filesystem;
use crate::session::Session;
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub path: String,
    pub filesystem_type: String,
    /// Start time of the last crawl of this root; zero until one has run.
    pub last_indexed: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: i64,
    pub dir_count: i64,
    pub total_size_bytes: i64,
}

/// Register `path` for indexing, or refresh its type and re-enable it if it is
/// already registered. An empty `fs_type` is filled in by probing the path.
pub fn register_mount_point(session: &Session, path: &str, fs_type: &str) -> Result<bool> {
    let fs_type = if fs_type.is_empty() {
        detect_filesystem(path)
    } else {
        fs_type.to_string()
    };

    let conn = session.lock()?;
    conn.execute(
        "INSERT INTO mount_points (path, filesystem_type, enabled) VALUES (?1, ?2, 1)
         ON CONFLICT(path) DO UPDATE SET
             filesystem_type = excluded.filesystem_type,
             enabled = 1",
        params![path, fs_type],
    )?;
    tracing::debug!(path, fs_type = %fs_type, "registered mount point");
    Ok(true)
}

pub fn list_mount_points(session: &Session) -> Result<Vec<MountPoint>> {
    let conn = session.lock()?;
    let mut stmt = conn.prepare_cached(
        "SELECT path, COALESCE(filesystem_type, ''), COALESCE(last_indexed, 0), COALESCE(enabled, 1)
         FROM mount_points
         ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(MountPoint {
            path: row.get(0)?,
            filesystem_type: row.get(1)?,
            last_indexed: row.get(2)?,
            enabled: row.get::<_, i64>(3)? != 0,
        })
    })?;

    let mut mounts = Vec::new();
    for mount in rows {
        mounts.push(mount?);
    }
    Ok(mounts)
}

/// Returns whether a record was removed. File Records under the path are left alone.
pub fn remove_mount_point(session: &Session, path: &str) -> Result<bool> {
    let conn = session.lock()?;
    let removed = conn.execute("DELETE FROM mount_points WHERE path = ?1", params![path])?;
    Ok(removed > 0)
}

pub fn set_mount_point_enabled(session: &Session, path: &str, enabled: bool) -> Result<bool> {
    let conn = session.lock()?;
    let updated = conn.execute(
        "UPDATE mount_points SET enabled = ?1 WHERE path = ?2",
        params![enabled, path],
    )?;
    Ok(updated > 0)
}

pub fn get_stats(session: &Session) -> Result<IndexStats> {
    let conn = session.lock()?;
    let stats = conn.query_row(
        "SELECT
             COALESCE(SUM(is_directory = 0), 0),
             COALESCE(SUM(is_directory = 1), 0),
             COALESCE(SUM(CASE WHEN is_directory = 0 THEN size ELSE 0 END), 0)
         FROM files",
        [],
        |row| {
            Ok(IndexStats {
                file_count: row.get(0)?,
                dir_count: row.get(1)?,
                total_size_bytes: row.get(2)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempdir().unwrap();
        let session = Session::create(dir.path().join("index.db")).unwrap();
        (dir, session)
    }

    #[test]
    fn registered_mount_starts_unindexed() {
        let (_dir, session) = session();
        assert!(register_mount_point(&session, "/tmp/data", "ext4").unwrap());

        let mounts = list_mount_points(&session).unwrap();
        assert_eq!(
            mounts,
            vec![MountPoint {
                path: "/tmp/data".into(),
                filesystem_type: "ext4".into(),
                last_indexed: 0,
                enabled: true,
            }]
        );
    }

    #[test]
    fn reregistering_upserts() {
        let (_dir, session) = session();
        register_mount_point(&session, "/mnt/win", "ntfs").unwrap();
        session
            .lock()
            .unwrap()
            .execute("UPDATE mount_points SET last_indexed = 42", [])
            .unwrap();
        set_mount_point_enabled(&session, "/mnt/win", false).unwrap();

        register_mount_point(&session, "/mnt/win", "fuseblk").unwrap();

        let mounts = list_mount_points(&session).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].filesystem_type, "fuseblk");
        assert!(mounts[0].enabled);
        assert_eq!(mounts[0].last_indexed, 42);
    }

    #[test]
    fn empty_type_is_probed() {
        let (dir, session) = session();
        let path = dir.path().to_str().unwrap();
        register_mount_point(&session, path, "").unwrap();

        let mounts = list_mount_points(&session).unwrap();
        assert!(!mounts[0].filesystem_type.is_empty());
    }

    #[test]
    fn toggles_and_removes() {
        let (_dir, session) = session();
        register_mount_point(&session, "/a", "ext4").unwrap();
        register_mount_point(&session, "/b", "xfs").unwrap();

        assert!(set_mount_point_enabled(&session, "/a", false).unwrap());
        assert!(!set_mount_point_enabled(&session, "/missing", false).unwrap());
        assert!(!list_mount_points(&session).unwrap()[0].enabled);

        assert!(remove_mount_point(&session, "/a").unwrap());
        assert!(!remove_mount_point(&session, "/a").unwrap());
        let remaining: Vec<_> = list_mount_points(&session)
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(remaining, vec!["/b".to_string()]);
    }

    #[test]
    fn stats_on_empty_store_are_zero() {
        let (_dir, session) = session();
        assert_eq!(get_stats(&session).unwrap(), IndexStats::default());
    }
}
