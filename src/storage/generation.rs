//! Committed generations and reader pins.
//!
//! A `Generation` is an immutable SQLite file. Every reader holds a
//! `GenerationRef`, which keeps the file alive; once the store retires a
//! generation, the file is deleted when the last reference goes away.

use crate::error::{EngineError, Result};
use crate::model::GenerationId;
use crate::storage::connection::open_reader;
use crate::storage::schema::{read_generation_columns, TagColumn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct Generation {
    id: GenerationId,
    path: PathBuf,
    record_count: u64,
    columns: Vec<TagColumn>,
    by_key: HashMap<String, usize>,
    retired: AtomicBool,
}

impl Generation {
    pub(crate) fn new(id: GenerationId, path: PathBuf, record_count: u64, columns: Vec<TagColumn>) -> Self {
        let by_key = columns.iter().enumerate().map(|(i, c)| (c.tag_key.clone(), i)).collect();
        Self { id, path, record_count, columns, by_key, retired: AtomicBool::new(false) }
    }

    /// Load a committed generation from disk.
    pub(crate) fn load(dir: &Path, id: GenerationId) -> Result<Self> {
        let path = dir.join(id.file_name());
        if !path.is_file() {
            return Err(EngineError::Corrupt(format!(
                "generation {} is current but {} is missing",
                id,
                path.display()
            )));
        }
        let conn = open_reader(&path)?;
        let columns = read_generation_columns(&conn)
            .map_err(|e| EngineError::Corrupt(format!("generation {} unreadable: {}", id, e)))?;
        let record_count: u64 = conn.query_row("SELECT COUNT(*) FROM media", [], |r| r.get(0))?;
        Ok(Self::new(id, path, record_count, columns))
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[TagColumn] {
        &self.columns
    }

    /// Column holding `tag_key` in this generation, if it was built with one.
    pub fn column_for(&self, tag_key: &str) -> Option<&str> {
        self.by_key.get(tag_key).map(|&i| self.columns[i].column.as_str())
    }

    pub fn reader(&self) -> Result<Connection> {
        open_reader(&self.path)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("[Store] Reclaimed generation {} ({})", self.id, self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[Store] Failed to reclaim {}: {}", self.path.display(), e),
        }
    }
}

/// A pinned generation. The generation cannot be reclaimed while any ref exists.
#[derive(Debug, Clone)]
pub struct GenerationRef(Arc<Generation>);

impl GenerationRef {
    pub(crate) fn new(generation: Arc<Generation>) -> Self {
        Self(generation)
    }

    /// Unpin. Equivalent to dropping the ref.
    pub fn release(self) {}

    /// Outstanding pins on this generation, including the store's own if current.
    pub fn pin_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for GenerationRef {
    type Target = Generation;

    fn deref(&self) -> &Generation {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::open_build;
    use crate::storage::schema::create_generation_tables;

    fn write_generation(dir: &Path, id: GenerationId) -> PathBuf {
        let path = dir.join(id.file_name());
        let conn = open_build(&path).unwrap();
        create_generation_tables(&conn, id, &[]).unwrap();
        conn.execute("INSERT INTO media (path, name, size, mtime) VALUES ('/x.jpg', 'x.jpg', 1, 1)", []).unwrap();
        path
    }

    #[test]
    fn test_load_counts_records() {
        let dir = tempfile::tempdir().unwrap();
        write_generation(dir.path(), GenerationId(1));
        let gen = Generation::load(dir.path(), GenerationId(1)).unwrap();
        assert_eq!(gen.record_count(), 1);
        assert!(gen.columns().is_empty());
    }

    #[test]
    fn test_missing_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let err = Generation::load(dir.path(), GenerationId(7)).unwrap_err();
        assert!(matches!(err, EngineError::Corrupt(_)));
    }

    #[test]
    fn test_retired_file_removed_after_last_pin() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_generation(dir.path(), GenerationId(1));
        let gen = Arc::new(Generation::load(dir.path(), GenerationId(1)).unwrap());

        let pin = GenerationRef::new(Arc::clone(&gen));
        gen.retire();
        drop(gen);
        assert!(path.exists(), "pinned generation must survive retirement");
        assert_eq!(pin.pin_count(), 1);

        pin.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_unretired_file_kept_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_generation(dir.path(), GenerationId(2));
        drop(Generation::load(dir.path(), GenerationId(2)).unwrap());
        assert!(path.exists());
    }
}
