//! Collection store: one catalog plus a chain of immutable generation files.
//!
//! Publication protocol:
//! 1. `begin_build` reserves the single build slot and creates `gen-N.db.building`
//! 2. the builder fills it through the `BuildToken`
//! 3. `commit` validates, fsyncs and renames it to `gen-N.db`, records the new
//!    pointer in the catalog and swaps the in-memory pointer
//!
//! Readers never observe a partial generation. A crash at any step leaves the
//! previous pointer intact; `open` sweeps whatever the crash left behind.

use crate::error::{EngineError, Result};
use crate::model::{CollectionId, GenerationId};
use crate::storage::catalog::{CatalogRepository, CollectionRow, GenerationStatus};
use crate::storage::connection::{open_build, open_catalog, open_existing_catalog};
use crate::storage::generation::{Generation, GenerationRef};
use crate::storage::schema::{
    add_generation_column, create_generation_tables, SchemaManager, TagColumn, KEY_CURRENT_GENERATION,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

pub const CATALOG_FILE: &str = "catalog.db";

struct StoreShared {
    dir: PathBuf,
    catalog: Arc<Mutex<Connection>>,
    schema: Arc<SchemaManager>,
    current: RwLock<Arc<Generation>>,
    building: Mutex<Option<GenerationId>>,
}

impl StoreShared {
    fn with_catalog<T>(&self, f: impl FnOnce(&CatalogRepository) -> Result<T>) -> Result<T> {
        let conn = self.catalog.lock().map_err(|_| EngineError::poisoned())?;
        f(&CatalogRepository::new(&conn))
    }

    fn release_slot(&self, id: GenerationId) {
        if let Ok(mut slot) = self.building.lock() {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }
}

#[derive(Clone)]
pub struct CollectionStore {
    shared: Arc<StoreShared>,
}

impl CollectionStore {
    /// Lay out a new collection in `dir` with an empty generation 0.
    pub fn create(dir: &Path, id: &CollectionId, name: &str, roots: &[String], private: bool) -> Result<Self> {
        let catalog_path = dir.join(CATALOG_FILE);
        if catalog_path.exists() {
            return Err(EngineError::State(format!("collection already exists at {}", dir.display())));
        }

        let catalog = Arc::new(Mutex::new(open_catalog(&catalog_path)?));
        let schema = SchemaManager::open(Arc::clone(&catalog))?;

        let genesis = GenerationId(0);
        write_empty_generation(dir, genesis, &schema.columns()?)?;

        {
            let mut conn = catalog.lock().map_err(|_| EngineError::poisoned())?;
            let tx = conn.transaction()?;
            let repo = CatalogRepository::new(&tx);
            let now = Utc::now();
            repo.insert_collection(&CollectionRow {
                id: id.clone(),
                name: name.to_string(),
                private,
                created_at: now,
                last_reindex_at: None,
            })?;
            for root in roots {
                repo.add_root(root)?;
            }
            repo.insert_generation(genesis, GenerationStatus::Building, now)?;
            repo.finish_generation(genesis, GenerationStatus::Committed, 0, 0, now)?;
            repo.set_config(KEY_CURRENT_GENERATION, &genesis.0.to_string())?;
            tx.commit()?;
        }
        drop(schema);
        drop(catalog);

        tracing::info!("[Store] Created collection {} at {}", id, dir.display());
        Self::open(dir)
    }

    /// Open an existing collection, recovering from any interrupted build.
    pub fn open(dir: &Path) -> Result<Self> {
        let catalog = Arc::new(Mutex::new(open_existing_catalog(&dir.join(CATALOG_FILE))?));
        let schema = Arc::new(SchemaManager::open(Arc::clone(&catalog))?);

        let current_id = {
            let conn = catalog.lock().map_err(|_| EngineError::poisoned())?;
            let repo = CatalogRepository::new(&conn);
            let current = repo.current_generation()?;
            let stale = repo.abort_stale_builds()?;
            if stale > 0 {
                tracing::warn!("[Store] Discarded {} interrupted build(s) in {}", stale, dir.display());
            }
            current
        };

        let current = Generation::load(dir, current_id)?;
        sweep_leftovers(dir, current_id)?;

        tracing::debug!(
            "[Store] Opened {} at generation {} ({} records)",
            dir.display(),
            current_id,
            current.record_count()
        );

        Ok(Self {
            shared: Arc::new(StoreShared {
                dir: dir.to_path_buf(),
                catalog,
                schema,
                current: RwLock::new(Arc::new(current)),
                building: Mutex::new(None),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn schema(&self) -> &Arc<SchemaManager> {
        &self.shared.schema
    }

    /// Run `f` against the catalog under its lock.
    pub fn with_catalog<T>(&self, f: impl FnOnce(&CatalogRepository) -> Result<T>) -> Result<T> {
        self.shared.with_catalog(f)
    }

    /// Pin the current generation.
    pub fn current_generation(&self) -> Result<GenerationRef> {
        let current = self.shared.current.read().map_err(|_| EngineError::poisoned())?;
        Ok(GenerationRef::new(Arc::clone(&current)))
    }

    pub fn release(&self, generation: GenerationRef) {
        generation.release();
    }

    pub fn is_building(&self) -> bool {
        self.shared.building.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Reserve the build slot and create the building file.
    pub fn begin_build(&self) -> Result<BuildToken> {
        let mut slot = self.shared.building.lock().map_err(|_| EngineError::poisoned())?;
        if slot.is_some() {
            return Err(EngineError::AlreadyIndexing);
        }

        let started_at = Utc::now();
        let generation = self.shared.with_catalog(|repo| {
            let id = repo.next_generation_id()?;
            repo.insert_generation(id, GenerationStatus::Building, started_at)?;
            Ok(id)
        })?;

        let building_path = self.shared.dir.join(generation.building_file_name());
        let columns = self.shared.schema.columns()?;
        let conn = open_build(&building_path)
            .and_then(|conn| create_generation_tables(&conn, generation, &columns).map(|_| conn));
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                let _ = std::fs::remove_file(&building_path);
                let _ = self.shared.with_catalog(|repo| repo.set_generation_status(generation, GenerationStatus::Aborted));
                return Err(e);
            }
        };

        *slot = Some(generation);
        tracing::info!("[Store] Build of generation {} started", generation);

        Ok(BuildToken {
            shared: Arc::clone(&self.shared),
            generation,
            path: building_path,
            conn: Some(conn),
            columns: BuildColumns {
                schema: Arc::clone(&self.shared.schema),
                generation,
                present: columns.into_iter().map(|c| (c.tag_key.clone(), c)).collect(),
            },
            cancel: CancellationToken::new(),
            records_written: 0,
            warning_count: 0,
            started_at,
            finished: false,
        })
    }

    /// Atomically publish a completed build.
    pub fn commit(&self, mut token: BuildToken) -> Result<GenerationRef> {
        if !Arc::ptr_eq(&self.shared, &token.shared) {
            return Err(EngineError::State("build token belongs to another collection".into()));
        }
        if token.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let conn = token.conn.take()
            .ok_or_else(|| EngineError::State("build connection already closed".into()))?;
        validate_build(&conn, token.records_written)?;
        conn.close().map_err(|(_, e)| EngineError::Database(e))?;

        File::open(&token.path)?.sync_all()?;
        let final_path = self.shared.dir.join(token.generation.file_name());
        std::fs::rename(&token.path, &final_path)?;
        // From here on a failed commit must remove the published name
        token.path = final_path;
        sync_dir(&self.shared.dir);

        let next = Arc::new(Generation::load(&self.shared.dir, token.generation)?);

        let mut current = self.shared.current.write().map_err(|_| EngineError::poisoned())?;
        let previous = current.id();
        {
            let mut conn = self.shared.catalog.lock().map_err(|_| EngineError::poisoned())?;
            let tx = conn.transaction()?;
            let repo = CatalogRepository::new(&tx);
            repo.set_config(KEY_CURRENT_GENERATION, &token.generation.0.to_string())?;
            repo.finish_generation(
                token.generation,
                GenerationStatus::Committed,
                token.records_written,
                token.warning_count,
                Utc::now(),
            )?;
            repo.set_generation_status(previous, GenerationStatus::Retired)?;
            tx.commit()?;
        }

        let old = std::mem::replace(&mut *current, Arc::clone(&next));
        drop(current);
        old.retire();
        drop(old);

        token.finished = true;
        self.shared.release_slot(token.generation);

        tracing::info!(
            "[Store] Committed generation {} ({} records, {} warnings), retired {}",
            token.generation,
            token.records_written,
            token.warning_count,
            previous
        );
        Ok(GenerationRef::new(next))
    }

    /// Discard a build. The current generation is untouched.
    pub fn abort(&self, token: BuildToken) {
        tracing::info!("[Store] Aborting build of generation {}", token.generation);
        drop(token);
    }
}

/// The single in-flight build of a collection.
pub struct BuildToken {
    shared: Arc<StoreShared>,
    generation: GenerationId,
    path: PathBuf,
    conn: Option<Connection>,
    columns: BuildColumns,
    cancel: CancellationToken,
    records_written: u64,
    warning_count: u64,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl BuildToken {
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub(crate) fn note_written(&mut self, n: u64) {
        self.records_written += n;
    }

    pub(crate) fn set_warning_count(&mut self, n: u64) {
        self.warning_count = n;
    }

    /// The build connection and its column set, borrowed together.
    pub(crate) fn writer(&mut self) -> Result<(&mut Connection, &mut BuildColumns)> {
        let conn = self.conn.as_mut()
            .ok_or_else(|| EngineError::State("build connection already closed".into()))?;
        Ok((conn, &mut self.columns))
    }

    fn discard(&mut self) {
        self.conn.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[Store] Failed to remove {}: {}", self.path.display(), e),
        }
        let generation = self.generation;
        if let Err(e) = self.shared.with_catalog(|repo| repo.set_generation_status(generation, GenerationStatus::Aborted)) {
            tracing::warn!("[Store] Could not mark generation {} aborted: {}", generation, e);
        }
        self.shared.release_slot(generation);
    }
}

impl Drop for BuildToken {
    fn drop(&mut self) {
        if !self.finished {
            self.discard();
        }
    }
}

/// Tag columns present in the generation being built.
pub(crate) struct BuildColumns {
    schema: Arc<SchemaManager>,
    generation: GenerationId,
    present: HashMap<String, TagColumn>,
}

impl BuildColumns {
    /// Column for `tag_key`, adding it to the catalog and the build file on first sight.
    pub(crate) fn ensure(&mut self, conn: &Connection, tag_key: &str) -> Result<String> {
        if let Some(col) = self.present.get(tag_key) {
            return Ok(col.column.clone());
        }
        let (column, _) = self.schema.column_for(tag_key, self.generation)?;
        add_generation_column(conn, &column)?;
        let name = column.column.clone();
        self.present.insert(tag_key.to_string(), column);
        Ok(name)
    }
}

fn validate_build(conn: &Connection, expected: u64) -> Result<()> {
    let count: u64 = conn
        .query_row("SELECT COUNT(*) FROM media", [], |r| r.get(0))
        .map_err(|e| EngineError::BuildIncomplete(format!("media table unreadable: {}", e)))?;
    if count != expected {
        return Err(EngineError::BuildIncomplete(format!(
            "expected {} records, found {}",
            expected, count
        )));
    }
    let check: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .map_err(|e| EngineError::BuildIncomplete(e.to_string()))?;
    if check != "ok" {
        return Err(EngineError::BuildIncomplete(format!("integrity check failed: {}", check)));
    }
    Ok(())
}

fn write_empty_generation(dir: &Path, id: GenerationId, columns: &[TagColumn]) -> Result<()> {
    let building = dir.join(id.building_file_name());
    {
        let conn = open_build(&building)?;
        create_generation_tables(&conn, id, columns)?;
    }
    File::open(&building)?.sync_all()?;
    std::fs::rename(&building, dir.join(id.file_name()))?;
    sync_dir(dir);
    Ok(())
}

/// Remove building files and generation files other than `current`.
fn sweep_leftovers(dir: &Path, current: GenerationId) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let stale = if name.ends_with(".building") {
            true
        } else {
            matches!(GenerationId::parse_file_name(&name), Some(id) if id != current)
        };
        if stale {
            tracing::info!("[Store] Sweeping leftover {}", name);
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!("[Store] Could not remove {}: {}", name, e);
            }
        }
    }
    Ok(())
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
