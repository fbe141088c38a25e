use rusqlite::Connection;

const FILES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        filename TEXT NOT NULL,
        extension TEXT,
        size INTEGER,
        modified INTEGER,
        is_directory INTEGER,
        filesystem_type TEXT,
        indexed_at INTEGER
    );
";

const MOUNT_POINTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS mount_points (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE NOT NULL,
        filesystem_type TEXT,
        last_indexed INTEGER,
        enabled INTEGER DEFAULT 1
    );
";

/// Lookup indexes over `files`. Dropped for the duration of a bulk crawl and
/// rebuilt afterwards, whatever the crawl's outcome.
const LOOKUP_INDEXES: &[(&str, &str)] = &[
    ("idx_filename", "files(filename COLLATE NOCASE)"),
    ("idx_path", "files(path COLLATE NOCASE)"),
    ("idx_extension", "files(extension)"),
];

pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(FILES_TABLE)?;
    conn.execute_batch(MOUNT_POINTS_TABLE)?;
    create_lookup_indexes(conn)
}

pub fn create_lookup_indexes(conn: &Connection) -> rusqlite::Result<()> {
    for (name, target) in LOOKUP_INDEXES {
        conn.execute_batch(&format!("CREATE INDEX IF NOT EXISTS {name} ON {target};"))?;
    }
    Ok(())
}

pub fn drop_lookup_indexes(conn: &Connection) -> rusqlite::Result<()> {
    for (name, _) in LOOKUP_INDEXES {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {name};"))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn lookup_index_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'files' AND name LIKE 'idx_%' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .map(|name| name.unwrap())
        .collect()
}
