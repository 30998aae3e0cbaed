//! SQLite connection setup
//!
//! Three flavours of connection, one per role:
//! - catalog: long-lived, WAL, durable
//! - build: a generation under construction; nobody else can see it, so it
//!   runs without syncing and is fsynced once before publication
//! - reader: read-only view of a committed generation

use crate::error::{EngineError, Result};
use regex::{Regex, RegexBuilder};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Open (creating if needed) a collection catalog.
pub fn open_catalog(db_path: &Path) -> Result<Connection> {
    let db_dir = db_path.parent()
        .ok_or_else(|| EngineError::InvalidPath(format!("Invalid catalog path: {}", db_path.display())))?;
    std::fs::create_dir_all(db_dir)?;

    let conn = Connection::open(db_path)?;

    // WAL lets queries read the catalog while a commit is writing it
    set_journal_mode(&conn, WAL)?;
    conn.pragma_update(None, "foreign_keys", ON)?;
    conn.pragma_update(None, "synchronous", NORMAL)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    tracing::debug!("[Storage] Catalog opened: {}", db_path.display());
    Ok(conn)
}

/// Open an existing catalog, failing with `NotFound` if it does not exist.
pub fn open_existing_catalog(db_path: &Path) -> Result<Connection> {
    if !db_path.is_file() {
        return Err(EngineError::NotFound(format!("No collection catalog at {}", db_path.display())));
    }
    open_catalog(db_path)
}

/// Open a fresh database file for a generation being built.
pub fn open_build(db_path: &Path) -> Result<Connection> {
    if db_path.exists() {
        tracing::warn!("[Storage] Stale build file {} will be replaced", db_path.display());
        std::fs::remove_file(db_path)?;
    }

    let conn = Connection::open(db_path)?;

    // Maximum throughput: the file is private until commit
    conn.pragma_update(None, "synchronous", OFF)?;
    set_journal_mode(&conn, MEMORY)?;
    Ok(conn)
}

/// Read-only connection to a committed generation.
pub fn open_reader(db_path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(db_path, flags)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    register_regexp(&conn)?;
    Ok(conn)
}

/// `x REGEXP pattern`, case-insensitive. NULL input yields NULL.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let re: Arc<Regex> = ctx.get_or_create_aux(0, |pattern| -> std::result::Result<Regex, BoxError> {
                Ok(RegexBuilder::new(pattern.as_str()?).case_insensitive(true).build()?)
            })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Null => None,
                ValueRef::Text(bytes) => Some(re.is_match(&String::from_utf8_lossy(bytes))),
                ValueRef::Integer(i) => Some(re.is_match(&i.to_string())),
                ValueRef::Real(r) => Some(re.is_match(&r.to_string())),
                ValueRef::Blob(_) => Some(false),
            };
            Ok(matched)
        },
    )?;
    Ok(())
}

fn set_journal_mode(conn: &Connection, mode: &str) -> Result<()> {
    let applied: String = conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
    if !applied.eq_ignore_ascii_case(mode) {
        tracing::warn!("[Storage] Requested journal_mode {} but SQLite chose {}", mode, applied);
    }
    Ok(())
}

// SQL pragma constants
const WAL: &str = "WAL";
const MEMORY: &str = "MEMORY";
const ON: &str = "ON";
const OFF: &str = "OFF";
const NORMAL: &str = "NORMAL";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_regexp_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.db");
        {
            let conn = open_build(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (v); INSERT INTO t VALUES ('Canon EOS'), ('Nikon'), (NULL), (42);")
                .unwrap();
        }
        let conn = open_reader(&path).unwrap();
        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap() };
        assert_eq!(count("SELECT COUNT(*) FROM t WHERE v REGEXP '^canon'"), 1);
        assert_eq!(count("SELECT COUNT(*) FROM t WHERE v NOT REGEXP '^canon'"), 2);
        assert_eq!(count("SELECT COUNT(*) FROM t WHERE v REGEXP '^4[0-9]$'"), 1);
    }

    #[test]
    fn test_catalog_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        let conn = open_catalog(&path).unwrap();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(path.exists());
    }

    #[test]
    fn test_existing_catalog_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_existing_catalog(&dir.path().join("missing.db")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_reader_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.db");
        {
            let conn = open_build(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);").unwrap();
        }
        let reader = open_reader(&path).unwrap();
        let x: i64 = reader.query_row("SELECT x FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(x, 1);
        assert!(reader.execute("INSERT INTO t VALUES (2)", []).is_err());
    }
}
