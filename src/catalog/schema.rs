use std::path::Path;

use rusqlite::Connection;

use crate::error::CoreResult;

const DB_VERSION: i32 = 1;

pub fn db_connection_with_timeout(db_path: &Path, busy_timeout_ms: u32) -> CoreResult<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(&format!(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
        PRAGMA busy_timeout={busy_timeout_ms};
        "#,
    ))?;
    Ok(conn)
}

pub fn db_connection(db_path: &Path) -> CoreResult<Connection> {
    db_connection_with_timeout(db_path, 3000)
}

/// ~2 GiB, the store's schema-level page cache baseline. `cache_size`'s
/// negative form is a KiB budget, not a page count.
const PAGE_CACHE_KIB: i64 = -2_097_152;

pub fn db_connection_for_search(db_path: &Path) -> CoreResult<Connection> {
    let conn = db_connection_with_timeout(db_path, 200)?;
    conn.execute_batch(&format!(
        "PRAGMA cache_size = {PAGE_CACHE_KIB};
         PRAGMA mmap_size = 268435456;",
    ))?;
    Ok(conn)
}

/// Switched to during `build`'s bulk insert: durability is restored by
/// [`restore_normal_pragmas`] once the batch finishes, so a crash mid-build
/// only costs a rebuild, never a corrupt catalog.
pub fn set_indexing_pragmas(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(&format!(
        r#"
        PRAGMA synchronous = OFF;
        PRAGMA cache_size = {PAGE_CACHE_KIB};
        PRAGMA mmap_size = 268435456;
        PRAGMA wal_autocheckpoint = 0;
        "#,
    ))?;
    Ok(())
}

pub fn restore_normal_pragmas(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(&format!(
        r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = {PAGE_CACHE_KIB};
        PRAGMA mmap_size = 0;
        PRAGMA wal_autocheckpoint = 1000;
        "#,
    ))?;
    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
    Ok(())
}

/// Ensure the schema is present at the current version, dropping and
/// recreating it on a version mismatch (the catalog has no migration path,
/// only rebuild-from-scratch).
pub fn init_db(db_path: &Path) -> CoreResult<bool> {
    let conn = db_connection(db_path)?;

    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap_or(0);
    if current_version != DB_VERSION {
        conn.execute_batch(
            r#"
            DROP TRIGGER IF EXISTS files_ai;
            DROP TRIGGER IF EXISTS files_ad;
            DROP TRIGGER IF EXISTS files_au;
            DROP TABLE IF EXISTS files_fts;
            DROP TABLE IF EXISTS files;
            "#,
        )?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", DB_VERSION))?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS files (
          id INTEGER PRIMARY KEY,
          full_path TEXT NOT NULL UNIQUE,
          filename TEXT NOT NULL,
          filename_lower TEXT NOT NULL,
          parent_dir TEXT NOT NULL,
          extension TEXT NOT NULL,
          size INTEGER NOT NULL,
          mtime REAL NOT NULL,
          is_dir INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_filename_lower ON files(filename_lower);
        CREATE INDEX IF NOT EXISTS idx_files_parent_dir ON files(parent_dir);
        CREATE INDEX IF NOT EXISTS idx_files_extension ON files(extension);

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )?;

    let fts_ok = enable_fts(&conn).is_ok();
    Ok(fts_ok)
}

/// Try to create the FTS5 auxiliary table + mirroring triggers. Failure
/// (FTS5 not compiled in) downgrades permanently to the LIKE path for this
/// catalog's lifetime; it is never a fatal error.
fn enable_fts(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
          filename, content='files', content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS files_ai AFTER INSERT ON files BEGIN
          INSERT INTO files_fts(rowid, filename) VALUES (new.id, new.filename);
        END;
        CREATE TRIGGER IF NOT EXISTS files_ad AFTER DELETE ON files BEGIN
          INSERT INTO files_fts(files_fts, rowid, filename) VALUES('delete', old.id, old.filename);
        END;
        CREATE TRIGGER IF NOT EXISTS files_au AFTER UPDATE ON files BEGIN
          INSERT INTO files_fts(files_fts, rowid, filename) VALUES('delete', old.id, old.filename);
          INSERT INTO files_fts(rowid, filename) VALUES (new.id, new.filename);
        END;
        "#,
    )?;
    Ok(())
}

/// Repopulate `files_fts` from the current contents of `files`. Needed after
/// a bulk load: the mirroring triggers only cover inserts/updates/deletes
/// that happen after they're created, not rows already in the table.
pub fn rebuild_fts_index(conn: &Connection) -> CoreResult<()> {
    conn.execute("INSERT INTO files_fts(files_fts) VALUES('rebuild')", [])?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0)).ok()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> CoreResult<()> {
    conn.execute("INSERT OR REPLACE INTO meta(key, value) VALUES(?1, ?2)", rusqlite::params![key, value])?;
    Ok(())
}
