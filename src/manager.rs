//! Collection Manager: the public face of the engine.
//!
//! Owns the registry and the table of open collections, and drives each
//! collection through `Closed -> Open -> (Indexing <-> Open) -> Closed`.
//! Every operation takes a `CollectionHandle` obtained from `create` or `open`.

use crate::config::EngineConfig;
use crate::engine::{BuildOutcome, DuplicateGroup, IndexBuilder, Query, QueryOutput, QueryService, ResultSet};
use crate::error::{EngineError, Result};
use crate::extract::{ExifTool, FingerprintService, MetadataExtractor};
use crate::logging::LogPolicy;
use crate::model::{CollectionId, CollectionInfo, MediaRecord};
use crate::state::{CollectionState, OpenCollections, StateCell};
use crate::storage::{CollectionRegistry, CollectionStore, GenerationRef, RegistryEntry};
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct OpenCollection {
    id: CollectionId,
    store: CollectionStore,
    state: StateCell,
    private: AtomicBool,
    build_cancel: Mutex<Option<CancellationToken>>,
}

/// Cheap, cloneable reference to an open collection.
#[derive(Clone)]
pub struct CollectionHandle(Arc<OpenCollection>);

impl CollectionHandle {
    fn new(id: CollectionId, store: CollectionStore, private: bool) -> Self {
        Self(Arc::new(OpenCollection {
            id,
            store,
            state: StateCell::new(CollectionState::Open),
            private: AtomicBool::new(private),
            build_cancel: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &CollectionId {
        &self.0.id
    }

    pub fn state(&self) -> CollectionState {
        self.0.state.load()
    }

    pub fn is_private(&self) -> bool {
        self.0.private.load(Ordering::Acquire)
    }

    pub fn log_policy(&self) -> LogPolicy {
        LogPolicy::for_collection(self.is_private())
    }

    pub(crate) fn store(&self) -> &CollectionStore {
        &self.0.store
    }

    pub(crate) fn same(&self, other: &CollectionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            CollectionState::Closed => Err(EngineError::State(format!("collection {} is closed", self.id()))),
            _ => Ok(()),
        }
    }

    fn cancel_build(&self) -> bool {
        match self.0.build_cancel.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("id", self.id())
            .field("state", &self.state())
            .field("private", &self.is_private())
            .finish()
    }
}

/// Returns the collection to `Open` when a reindex ends, however it ends.
///
/// If the collection was closed meanwhile, this is where it finally leaves the
/// open table: until then its build slot is still live.
struct IndexingGuard<'a> {
    handle: &'a CollectionHandle,
    open: &'a OpenCollections,
}

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.handle.0.build_cancel.lock() {
            *slot = None;
        }
        if self.handle.0.state.transition(CollectionState::Indexing, CollectionState::Open).is_err() {
            self.open.unregister_handle(self.handle);
            tracing::info!("[Manager] Collection {} closed after its reindex stopped", self.handle.id());
        }
    }
}

pub struct CollectionManager {
    config: EngineConfig,
    registry: Mutex<CollectionRegistry>,
    open: OpenCollections,
    builder: IndexBuilder,
    queries: QueryService,
}

impl CollectionManager {
    /// Manager backed by the `exiftool` binary named in the config.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let extractor = Arc::new(ExifTool::new(config.exiftool_path.clone()));
        Self::with_extractor(config, extractor)
    }

    pub fn with_extractor(config: EngineConfig, extractor: Arc<dyn MetadataExtractor>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.collections_dir())?;
        let registry = CollectionRegistry::load(&config.registry_file(), config.history_limit)?;
        let fingerprints = Arc::new(FingerprintService::new(config.fingerprint_cache_capacity));
        let builder = IndexBuilder::new(extractor, fingerprints, &config);
        let queries = QueryService::new(config.page_size);

        tracing::info!("[Manager] Data directory: {}", config.data_dir.display());
        Ok(Self {
            config,
            registry: Mutex::new(registry),
            open: OpenCollections::new(),
            builder,
            queries,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn with_registry<T>(&self, f: impl FnOnce(&mut CollectionRegistry) -> Result<T>) -> Result<T> {
        let mut registry = self.registry.lock().map_err(|_| EngineError::poisoned())?;
        f(&mut registry)
    }

    // ========== Lifecycle ==========

    /// Create a collection over `roots` and open it. Generation 0 is empty.
    pub fn create<P: AsRef<Path>>(&self, name: &str, roots: &[P]) -> Result<CollectionHandle> {
        let roots = roots.iter().map(|r| canonical_root(r.as_ref())).collect::<Result<Vec<_>>>()?;
        let id = CollectionId::generate();
        let dir = self.config.collections_dir().join(id.as_str());

        let store = CollectionStore::create(&dir, &id, name, &roots, false)?;
        let now = Utc::now();
        self.with_registry(|registry| {
            registry.add(RegistryEntry {
                id: id.clone(),
                name: name.to_string(),
                dir: dir.clone(),
                roots: roots.clone(),
                private: false,
                created_at: now,
                updated_at: now,
            })?;
            registry.touch_history(&id)
        })?;

        let handle = CollectionHandle::new(id, store, false);
        self.open.register(handle.clone());
        tracing::info!("[Manager] Created collection '{}' ({}) with {} root(s)", name, handle.id(), roots.len());
        Ok(handle)
    }

    /// Open a registered collection. Opening an already open one returns the same handle.
    pub fn open(&self, id: &CollectionId) -> Result<CollectionHandle> {
        if let Some(handle) = self.open.get(id) {
            if handle.state() == CollectionState::Closed {
                return Err(EngineError::State(format!(
                    "collection {} is still closing; its reindex has not stopped yet",
                    id
                )));
            }
            self.with_registry(|registry| registry.touch_history(id))?;
            return Ok(handle);
        }

        let dir = self.with_registry(|registry| {
            registry
                .get(id)
                .map(|entry| entry.dir.clone())
                .ok_or_else(|| EngineError::NotFound(format!("collection {}", id)))
        })?;

        let store = CollectionStore::open(&dir)?;
        let row = store.with_catalog(|repo| repo.load_collection())?;
        let handle = CollectionHandle::new(id.clone(), store, row.private);
        self.open.register(handle.clone());
        self.with_registry(|registry| registry.touch_history(id))?;

        if handle.log_policy().per_file() {
            tracing::info!("[Manager] Opened collection '{}' ({})", row.name, id);
        } else {
            tracing::info!("[Manager] Opened collection {}", id);
        }
        Ok(handle)
    }

    /// Close a collection, cancelling any reindex in flight.
    ///
    /// A collection closed mid-reindex stays in the open table, refusing `open`,
    /// until the reindex has unwound and released its build.
    pub fn close(&self, handle: &CollectionHandle) -> Result<()> {
        match handle.0.state.swap(CollectionState::Closed) {
            CollectionState::Closed => {
                return Err(EngineError::State(format!("collection {} is closed", handle.id())));
            }
            CollectionState::Open => {
                self.open.unregister_handle(handle);
                tracing::info!("[Manager] Closed collection {}", handle.id());
            }
            CollectionState::Indexing => {
                handle.cancel_build();
                tracing::info!("[Manager] Closing collection {}; cancelling its reindex", handle.id());
            }
        }
        Ok(())
    }

    /// Build a new generation from the collection's roots and publish it.
    ///
    /// Rejected with `AlreadyIndexing` while another reindex runs. Per-file
    /// problems come back as warnings; on any error the previous generation
    /// stays current.
    pub async fn reindex(&self, handle: &CollectionHandle) -> Result<BuildOutcome> {
        match handle.0.state.transition(CollectionState::Open, CollectionState::Indexing) {
            Ok(()) => {}
            Err(CollectionState::Indexing) => return Err(EngineError::AlreadyIndexing),
            Err(_) => return Err(EngineError::State(format!("collection {} is closed", handle.id()))),
        }
        let _guard = IndexingGuard { handle, open: &self.open };

        let store = handle.store();
        let token = store.begin_build()?;
        {
            let mut slot = handle.0.build_cancel.lock().map_err(|_| EngineError::poisoned())?;
            *slot = Some(token.cancellation());
        }
        // `close` sets Closed before looking for a token to cancel
        if handle.state() == CollectionState::Closed {
            store.abort(token);
            return Err(EngineError::Cancelled);
        }

        let roots: Vec<String> = store.with_catalog(|repo| repo.list_roots())?
            .into_iter()
            .map(|r| r.path)
            .collect();
        let previous = store.current_generation()?;
        let policy = handle.log_policy();

        tracing::info!("[Manager] Reindexing {} into generation {}", handle.id(), token.generation());
        let (token, outcome) = match self.builder.build(&roots, token, Some(previous), policy).await {
            Ok(built) => built,
            Err(e) => {
                tracing::warn!("[Manager] Reindex of {} aborted: {}", handle.id(), e);
                return Err(e);
            }
        };

        store.commit(token)?;

        // The new generation is live; bookkeeping failures from here on are logged only
        let now = Utc::now();
        let scans = store.with_catalog(|repo| {
            for root in &outcome.roots {
                repo.update_root_scan(&root.root, root.status, now, root.file_count)?;
            }
            repo.set_last_reindex(now)
        });
        if let Err(e) = scans {
            tracing::error!("[Manager] Could not record root scans for {}: {}", handle.id(), e);
        }
        if let Err(e) = self.with_registry(|registry| registry.update(handle.id(), |_| {})) {
            tracing::error!("[Manager] Could not update registry for {}: {}", handle.id(), e);
        }

        Ok(outcome)
    }

    /// Cancel a reindex in flight. Returns false if none was running.
    pub fn cancel_reindex(&self, handle: &CollectionHandle) -> bool {
        let cancelled = handle.cancel_build();
        if cancelled {
            tracing::info!("[Manager] Cancellation requested for {}", handle.id());
        }
        cancelled
    }

    // ========== Metadata ==========

    /// Hide the collection from history and reduce its log verbosity.
    pub fn mark_private(&self, handle: &CollectionHandle) -> Result<()> {
        self.set_private(handle, true)
    }

    pub fn mark_public(&self, handle: &CollectionHandle) -> Result<()> {
        self.set_private(handle, false)
    }

    fn set_private(&self, handle: &CollectionHandle, private: bool) -> Result<()> {
        handle.ensure_open()?;
        handle.store().with_catalog(|repo| repo.set_private(private))?;
        handle.0.private.store(private, Ordering::Release);
        self.with_registry(|registry| {
            registry.update(handle.id(), |entry| entry.private = private)?;
            if private {
                registry.remove_from_history(handle.id())
            } else {
                registry.touch_history(handle.id())
            }
        })?;
        tracing::info!("[Manager] Collection {} is now {}", handle.id(), if private { "private" } else { "public" });
        Ok(())
    }

    pub fn rename(&self, handle: &CollectionHandle, name: &str) -> Result<()> {
        handle.ensure_open()?;
        handle.store().with_catalog(|repo| repo.set_name(name))?;
        self.with_registry(|registry| registry.update(handle.id(), |entry| entry.name = name.to_string()))
    }

    /// Register another root. Takes effect at the next reindex.
    pub fn add_root(&self, handle: &CollectionHandle, root: impl AsRef<Path>) -> Result<bool> {
        self.ensure_idle(handle)?;
        let root = canonical_root(root.as_ref())?;
        let added = handle.store().with_catalog(|repo| repo.add_root(&root))?;
        if added {
            self.sync_roots(handle)?;
        }
        Ok(added)
    }

    /// Unregister a root. Its records disappear at the next reindex.
    pub fn remove_root(&self, handle: &CollectionHandle, root: impl AsRef<Path>) -> Result<bool> {
        self.ensure_idle(handle)?;
        let root = root.as_ref().to_string_lossy().into_owned();
        let removed = handle.store().with_catalog(|repo| repo.remove_root(&root))?;
        if removed {
            self.sync_roots(handle)?;
        }
        Ok(removed)
    }

    fn ensure_idle(&self, handle: &CollectionHandle) -> Result<()> {
        match handle.state() {
            CollectionState::Open => Ok(()),
            CollectionState::Indexing => Err(EngineError::AlreadyIndexing),
            CollectionState::Closed => Err(EngineError::State(format!("collection {} is closed", handle.id()))),
        }
    }

    fn sync_roots(&self, handle: &CollectionHandle) -> Result<()> {
        let roots: Vec<String> = handle.store().with_catalog(|repo| repo.list_roots())?
            .into_iter()
            .map(|r| r.path)
            .collect();
        self.with_registry(|registry| registry.update(handle.id(), |entry| entry.roots = roots))
    }

    /// Remove a closed collection from the registry and delete its data.
    pub fn delete(&self, id: &CollectionId) -> Result<()> {
        if self.open.contains(id) {
            return Err(EngineError::State(format!("collection {} is open; close it first", id)));
        }
        let entry = self.with_registry(|registry| registry.remove(id))?;
        match std::fs::remove_dir_all(&entry.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("[Manager] Deleted collection {}", id);
        Ok(())
    }

    pub fn info(&self, handle: &CollectionHandle) -> Result<CollectionInfo> {
        handle.ensure_open()?;
        let store = handle.store();
        let (row, roots) = store.with_catalog(|repo| Ok((repo.load_collection()?, repo.list_roots()?)))?;
        Ok(CollectionInfo {
            id: row.id,
            name: row.name,
            roots,
            private: row.private,
            current_generation: store.current_generation()?.id(),
            created_at: row.created_at,
            last_reindex_at: row.last_reindex_at,
        })
    }

    pub fn state(&self, id: &CollectionId) -> CollectionState {
        self.open.get(id).map(|h| h.state()).unwrap_or(CollectionState::Closed)
    }

    /// Every registered collection, private ones included.
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        self.with_registry(|registry| Ok(registry.list()))
    }

    /// Recently opened public collections, most recent first.
    pub fn history(&self) -> Result<Vec<RegistryEntry>> {
        self.with_registry(|registry| Ok(registry.history()))
    }

    pub fn open_collections(&self) -> Vec<CollectionId> {
        self.open.ids()
    }

    // ========== Queries ==========

    /// Pin the current generation.
    pub fn current_generation(&self, handle: &CollectionHandle) -> Result<GenerationRef> {
        handle.ensure_open()?;
        handle.store().current_generation()
    }

    pub fn query(&self, handle: &CollectionHandle, query: &Query) -> Result<QueryOutput> {
        let generation = self.current_generation(handle)?;
        self.queries.query(generation, query)
    }

    pub fn search(&self, handle: &CollectionHandle, free_text: &str) -> Result<ResultSet> {
        let generation = self.current_generation(handle)?;
        self.queries.search(generation, free_text)
    }

    pub fn get(&self, handle: &CollectionHandle, path: &str) -> Result<Option<MediaRecord>> {
        let generation = self.current_generation(handle)?;
        self.queries.get(&generation, path)
    }

    pub fn duplicates(&self, handle: &CollectionHandle) -> Result<Vec<DuplicateGroup>> {
        let generation = self.current_generation(handle)?;
        self.queries.duplicates(&generation)
    }

    /// Every tag key the collection has ever seen, first-seen order.
    pub fn known_tags(&self, handle: &CollectionHandle) -> Result<Vec<String>> {
        handle.ensure_open()?;
        handle.store().schema().known_tags()
    }
}

fn canonical_root(root: &Path) -> Result<String> {
    let canonical = std::fs::canonicalize(root)
        .map_err(|e| EngineError::InvalidPath(format!("{}: {}", root.display(), e)))?;
    if !canonical.is_dir() {
        return Err(EngineError::InvalidPath(format!("{} is not a directory", root.display())));
    }
    Ok(canonical.to_string_lossy().into_owned())
}
