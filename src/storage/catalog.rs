// FILE: src/storage/catalog.rs
use crate::error::{EngineError, Result};
use crate::model::{CollectionId, GenerationId, RootPath, ScanStatus};
use crate::storage::schema::KEY_CURRENT_GENERATION;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Row of the `collection` table.
#[derive(Debug, Clone)]
pub struct CollectionRow {
    pub id: CollectionId,
    pub name: String,
    pub private: bool,
    pub created_at: DateTime<Utc>,
    pub last_reindex_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Building,
    Committed,
    Retired,
    Aborted,
}

impl GenerationStatus {
    fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Building => "building",
            GenerationStatus::Committed => "committed",
            GenerationStatus::Retired => "retired",
            GenerationStatus::Aborted => "aborted",
        }
    }
}

pub struct CatalogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CatalogRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row("SELECT value FROM system_config WHERE key = ?1", params![key], |r| r.get(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(EngineError::Database(e)),
        }
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO system_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )?;
        Ok(())
    }

    /// The persisted current-generation pointer. Missing or garbled means corrupt.
    pub fn current_generation(&self) -> Result<GenerationId> {
        let raw = self.get_config(KEY_CURRENT_GENERATION)?
            .ok_or_else(|| EngineError::Corrupt("no current generation recorded".into()))?;
        raw.parse::<u64>()
            .map(GenerationId)
            .map_err(|_| EngineError::Corrupt(format!("unreadable generation pointer '{}'", raw)))
    }

    pub fn insert_collection(&self, row: &CollectionRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO collection (singleton, collection_id, name, private, created_at, last_reindex_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![row.id.as_str(), row.name, row.private, row.created_at, row.last_reindex_at],
        )?;
        Ok(())
    }

    pub fn load_collection(&self) -> Result<CollectionRow> {
        let result = self.conn.query_row(
            "SELECT collection_id, name, private, created_at, last_reindex_at FROM collection WHERE singleton = 1",
            [],
            |row| {
                Ok(CollectionRow {
                    id: CollectionId::from(row.get::<_, String>(0)?.as_str()),
                    name: row.get(1)?,
                    private: row.get(2)?,
                    created_at: row.get(3)?,
                    last_reindex_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(row) => Ok(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(EngineError::Corrupt("catalog has no collection row".into())),
            Err(e) => Err(EngineError::Database(e)),
        }
    }

    pub fn set_private(&self, private: bool) -> Result<()> {
        self.conn.execute("UPDATE collection SET private = ?1 WHERE singleton = 1", params![private])?;
        Ok(())
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.conn.execute("UPDATE collection SET name = ?1 WHERE singleton = 1", params![name])?;
        Ok(())
    }

    pub fn set_last_reindex(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute("UPDATE collection SET last_reindex_at = ?1 WHERE singleton = 1", params![at])?;
        Ok(())
    }

    pub fn list_roots(&self) -> Result<Vec<RootPath>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, last_scan_at, last_scan_status, file_count FROM root_paths ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RootPath {
                path: row.get(0)?,
                last_scan_at: row.get(1)?,
                last_scan_status: ScanStatus::parse(&row.get::<_, String>(2)?),
                file_count: row.get(3)?,
            })
        })?;
        let mut roots = Vec::new();
        for r in rows { roots.push(r?); }
        Ok(roots)
    }

    /// Returns false if the root was already registered.
    pub fn add_root(&self, path: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO root_paths (path, position)
             VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM root_paths))",
            params![path],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_root(&self, path: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM root_paths WHERE path = ?1", params![path])?;
        Ok(rows > 0)
    }

    pub fn update_root_scan(&self, path: &str, status: ScanStatus, at: DateTime<Utc>, file_count: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE root_paths SET last_scan_status = ?1, last_scan_at = ?2, file_count = ?3 WHERE path = ?4",
            params![status.as_str(), at, file_count, path],
        )?;
        Ok(())
    }

    pub fn next_generation_id(&self) -> Result<GenerationId> {
        let max: Option<u64> = self.conn
            .query_row("SELECT MAX(generation_id) FROM generations", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(max.map(|m| GenerationId(m + 1)).unwrap_or(GenerationId(0)))
    }

    pub fn insert_generation(&self, id: GenerationId, status: GenerationStatus, started_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO generations (generation_id, status, started_at) VALUES (?1, ?2, ?3)",
            params![id.0, status.as_str(), started_at],
        )?;
        Ok(())
    }

    pub fn finish_generation(
        &self,
        id: GenerationId,
        status: GenerationStatus,
        record_count: u64,
        warning_count: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE generations SET status = ?1, record_count = ?2, warning_count = ?3, finished_at = ?4
             WHERE generation_id = ?5",
            params![status.as_str(), record_count, warning_count, at, id.0],
        )?;
        Ok(())
    }

    pub fn set_generation_status(&self, id: GenerationId, status: GenerationStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE generations SET status = ?1 WHERE generation_id = ?2",
            params![status.as_str(), id.0],
        )?;
        Ok(())
    }

    /// Builds left behind by a crash can never be committed.
    pub fn abort_stale_builds(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE generations SET status = 'aborted' WHERE status = 'building'",
            [],
        )?;
        Ok(rows)
    }
}
