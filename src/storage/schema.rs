//! Schema management
//!
//! Two schemas live here:
//! - the per-collection catalog, versioned and migrated step by step
//! - the per-generation `media` table, whose tag columns grow as new tag keys
//!   are observed
//!
//! Tag columns are append-only across a collection's lifetime. A key gets a
//! stable column name (`tag_<id>`) the first time any build sees it, and that
//! mapping never changes or disappears, so older generations stay readable
//! with whatever subset of columns they were built with.

use crate::error::{EngineError, Result};
use crate::model::GenerationId;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub const CATALOG_SCHEMA_VERSION: u32 = 2;

pub const KEY_SCHEMA_VERSION: &str = "schema_version";
pub const KEY_CURRENT_GENERATION: &str = "current_generation";

/// Fixed `media` columns, in the order they are selected.
pub const MEDIA_BASE_COLUMNS: &[&str] = &[
    "path", "name", "size", "mtime", "mtime_nsec", "format", "mime", "fingerprint", "search_text",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagColumn {
    pub tag_key: String,
    pub column: String,
}

impl TagColumn {
    fn from_id(tag_key: String, column_id: i64) -> Self {
        Self { tag_key, column: format!("tag_{}", column_id) }
    }
}

pub struct SchemaManager {
    catalog: Arc<Mutex<Connection>>,
    /// Known columns in first-seen order
    columns: RwLock<Vec<TagColumn>>,
    by_key: RwLock<HashMap<String, TagColumn>>,
}

impl SchemaManager {
    /// Bring the catalog up to `CATALOG_SCHEMA_VERSION` and load the tag column map.
    pub fn open(catalog: Arc<Mutex<Connection>>) -> Result<Self> {
        let manager = Self {
            catalog,
            columns: RwLock::new(Vec::new()),
            by_key: RwLock::new(HashMap::new()),
        };
        manager.ensure_schema(CATALOG_SCHEMA_VERSION)?;
        manager.reload_columns()?;
        Ok(manager)
    }

    /// Create the catalog if absent and migrate it to `version`.
    pub fn ensure_schema(&self, version: u32) -> Result<()> {
        let current = {
            let conn = self.catalog.lock().map_err(|_| EngineError::poisoned())?;
            let current = read_schema_version(&conn)?;
            if current == 0 {
                create_catalog_v1(&conn)?;
                tracing::info!("[Schema] Initialized new catalog (v1)");
            }
            current.max(1)
        };

        if current > version {
            return Err(EngineError::Corrupt(format!(
                "catalog schema v{} is newer than supported v{}",
                current, version
            )));
        }
        if current < version {
            self.migrate(current, version)?;
        }
        Ok(())
    }

    /// Apply every migration step between `from` and `to`, each in its own transaction.
    pub fn migrate(&self, from: u32, to: u32) -> Result<()> {
        let mut conn = self.catalog.lock().map_err(|_| EngineError::poisoned())?;
        for step in from..to {
            let tx = conn.transaction()?;
            match step {
                1 => {
                    tracing::info!("[Schema] Migrating catalog v1 -> v2: scan counters");
                    tx.execute_batch(r#"
                        ALTER TABLE generations ADD COLUMN warning_count INTEGER NOT NULL DEFAULT 0;
                        ALTER TABLE root_paths ADD COLUMN file_count INTEGER NOT NULL DEFAULT 0;
                    "#)?;
                }
                other => {
                    return Err(EngineError::Corrupt(format!("no catalog migration from v{}", other)));
                }
            }
            tx.execute(
                "INSERT INTO system_config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                params![KEY_SCHEMA_VERSION, (step + 1).to_string()],
            )?;
            tx.commit()?;
        }
        Ok(())
    }

    fn reload_columns(&self) -> Result<()> {
        let loaded = {
            let conn = self.catalog.lock().map_err(|_| EngineError::poisoned())?;
            let mut stmt = conn.prepare("SELECT tag_key, column_id FROM tag_columns ORDER BY column_id")?;
            let rows = stmt.query_map([], |row| Ok(TagColumn::from_id(row.get(0)?, row.get(1)?)))?;
            let mut loaded = Vec::new();
            for r in rows { loaded.push(r?); }
            loaded
        };

        let mut by_key = self.by_key.write().map_err(|_| EngineError::poisoned())?;
        *by_key = loaded.iter().map(|c| (c.tag_key.clone(), c.clone())).collect();
        *self.columns.write().map_err(|_| EngineError::poisoned())? = loaded;
        Ok(())
    }

    /// Column for `tag_key`, registering it if this is the first sighting.
    /// Returns `(column, newly_registered)`.
    pub fn column_for(&self, tag_key: &str, generation: GenerationId) -> Result<(TagColumn, bool)> {
        if let Some(col) = self.by_key.read().map_err(|_| EngineError::poisoned())?.get(tag_key) {
            return Ok((col.clone(), false));
        }

        let column = {
            let conn = self.catalog.lock().map_err(|_| EngineError::poisoned())?;
            conn.execute(
                "INSERT OR IGNORE INTO tag_columns (tag_key, first_seen_generation) VALUES (?1, ?2)",
                params![tag_key, generation.0],
            )?;
            let id: i64 = conn.query_row(
                "SELECT column_id FROM tag_columns WHERE tag_key = ?1",
                params![tag_key],
                |r| r.get(0),
            )?;
            TagColumn::from_id(tag_key.to_string(), id)
        };

        let mut by_key = self.by_key.write().map_err(|_| EngineError::poisoned())?;
        if let Some(existing) = by_key.get(tag_key) {
            return Ok((existing.clone(), false));
        }
        by_key.insert(tag_key.to_string(), column.clone());
        self.columns.write().map_err(|_| EngineError::poisoned())?.push(column.clone());
        tracing::debug!("[Schema] New tag column {} for '{}'", column.column, tag_key);
        Ok((column, true))
    }

    pub fn columns(&self) -> Result<Vec<TagColumn>> {
        Ok(self.columns.read().map_err(|_| EngineError::poisoned())?.clone())
    }

    /// Every tag key ever observed, first-seen order.
    pub fn known_tags(&self) -> Result<Vec<String>> {
        Ok(self.columns()?.into_iter().map(|c| c.tag_key).collect())
    }
}

fn read_schema_version(conn: &Connection) -> Result<u32> {
    let has_config: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='system_config'",
        [],
        |r| r.get(0),
    )?;
    if has_config == 0 {
        return Ok(0);
    }
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM system_config WHERE key = ?1",
            params![KEY_SCHEMA_VERSION],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(0),
        Some(v) => v.parse().map_err(|_| EngineError::Corrupt(format!("unreadable schema version '{}'", v))),
    }
}

fn create_catalog_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS system_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS collection (
            singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
            collection_id TEXT NOT NULL,
            name TEXT NOT NULL,
            private INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_reindex_at TEXT
        );

        CREATE TABLE IF NOT EXISTS root_paths (
            path TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            last_scan_at TEXT,
            last_scan_status TEXT NOT NULL DEFAULT 'never_scanned'
        );

        CREATE TABLE IF NOT EXISTS tag_columns (
            column_id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag_key TEXT NOT NULL UNIQUE,
            first_seen_generation INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS generations (
            generation_id INTEGER PRIMARY KEY,
            status TEXT NOT NULL,
            record_count INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            finished_at TEXT
        );

        INSERT OR REPLACE INTO system_config (key, value) VALUES ('schema_version', '1');
    "#)?;
    Ok(())
}

/// Create the tables of a new generation file with every column known so far.
pub fn create_generation_tables(conn: &Connection, generation: GenerationId, columns: &[TagColumn]) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE media (
            record_id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            mtime_nsec INTEGER NOT NULL DEFAULT 0,
            format TEXT,
            mime TEXT,
            fingerprint TEXT,
            search_text TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX media_format_idx ON media(format);
        CREATE INDEX media_fingerprint_idx ON media(fingerprint);

        CREATE TABLE tag_columns (
            tag_key TEXT PRIMARY KEY,
            column_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE generation_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    "#)?;
    conn.execute(
        "INSERT INTO generation_info (key, value) VALUES ('generation_id', ?1)",
        params![generation.0.to_string()],
    )?;
    for column in columns {
        add_generation_column(conn, column)?;
    }
    Ok(())
}

pub fn add_generation_column(conn: &Connection, column: &TagColumn) -> Result<()> {
    // Column names are generated (`tag_<id>`), never user input
    conn.execute_batch(&format!("ALTER TABLE media ADD COLUMN \"{}\"", column.column))?;
    conn.execute(
        "INSERT INTO tag_columns (tag_key, column_name) VALUES (?1, ?2)",
        params![column.tag_key, column.column],
    )?;
    Ok(())
}

/// Tag columns a generation file was built with.
pub fn read_generation_columns(conn: &Connection) -> Result<Vec<TagColumn>> {
    let mut stmt = conn.prepare("SELECT tag_key, column_name FROM tag_columns ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| Ok(TagColumn { tag_key: row.get(0)?, column: row.get(1)? }))?;
    let mut columns = Vec::new();
    for r in rows { columns.push(r?); }
    Ok(columns)
}
