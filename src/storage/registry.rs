//! Process-wide registry of known collections (`registry.json`).
//!
//! Private collections are listed as entries so they can be reopened, but
//! never appear in the recently-opened history.

use crate::error::{EngineError, Result};
use crate::model::CollectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: CollectionId,
    pub name: String,
    /// Directory holding the collection's catalog and generations
    pub dir: PathBuf,
    pub roots: Vec<String>,
    pub private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    entries: Vec<RegistryEntry>,
    /// Most recently opened first
    #[serde(default)]
    history: Vec<CollectionId>,
}

pub struct CollectionRegistry {
    path: PathBuf,
    history_limit: usize,
    data: RegistryFile,
}

impl CollectionRegistry {
    /// Load the registry, starting empty if the file does not exist yet.
    pub fn load(path: &Path, history_limit: usize) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| EngineError::Corrupt(format!("registry {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryFile::default(),
            Err(e) => return Err(e.into()),
        };
        let mut registry = Self { path: path.to_path_buf(), history_limit, data };
        registry.scrub_history();
        Ok(registry)
    }

    /// Write to a temp file and rename over the old registry.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn add(&mut self, entry: RegistryEntry) -> Result<()> {
        if self.get(&entry.id).is_some() {
            return Err(EngineError::State(format!("collection {} already registered", entry.id)));
        }
        self.data.entries.push(entry);
        self.save()
    }

    /// Apply `f` to an entry and persist. Private entries drop out of history.
    pub fn update(&mut self, id: &CollectionId, f: impl FnOnce(&mut RegistryEntry)) -> Result<()> {
        let entry = self.data.entries.iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("collection {}", id)))?;
        f(entry);
        entry.updated_at = Utc::now();
        self.scrub_history();
        self.save()
    }

    pub fn remove(&mut self, id: &CollectionId) -> Result<RegistryEntry> {
        let pos = self.data.entries.iter()
            .position(|e| &e.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("collection {}", id)))?;
        let entry = self.data.entries.remove(pos);
        self.data.history.retain(|h| h != id);
        self.save()?;
        Ok(entry)
    }

    pub fn get(&self, id: &CollectionId) -> Option<&RegistryEntry> {
        self.data.entries.iter().find(|e| &e.id == id)
    }

    pub fn list(&self) -> Vec<RegistryEntry> {
        self.data.entries.clone()
    }

    /// Move `id` to the front of history. No-op for private collections.
    pub fn touch_history(&mut self, id: &CollectionId) -> Result<()> {
        match self.get(id) {
            None => return Err(EngineError::NotFound(format!("collection {}", id))),
            Some(entry) if entry.private => return Ok(()),
            Some(_) => {}
        }
        self.data.history.retain(|h| h != id);
        self.data.history.insert(0, id.clone());
        self.data.history.truncate(self.history_limit);
        self.save()
    }

    pub fn remove_from_history(&mut self, id: &CollectionId) -> Result<()> {
        let before = self.data.history.len();
        self.data.history.retain(|h| h != id);
        if self.data.history.len() != before {
            self.save()?;
        }
        Ok(())
    }

    /// Recently opened collections, most recent first.
    pub fn history(&self) -> Vec<RegistryEntry> {
        self.data.history.iter().filter_map(|id| self.get(id)).cloned().collect()
    }

    fn scrub_history(&mut self) {
        let entries = &self.data.entries;
        self.data.history.retain(|id| entries.iter().any(|e| &e.id == id && !e.private));
        self.data.history.truncate(self.history_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, private: bool) -> RegistryEntry {
        let now = Utc::now();
        RegistryEntry {
            id: CollectionId::from(id),
            name: id.to_uppercase(),
            dir: PathBuf::from(format!("/data/{}", id)),
            roots: vec![format!("/media/{}", id)],
            private,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_history_order_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = CollectionRegistry::load(&dir.path().join("registry.json"), 2).unwrap();
        for id in ["a", "b", "c"] {
            reg.add(entry(id, false)).unwrap();
        }
        reg.touch_history(&"a".into()).unwrap();
        reg.touch_history(&"b".into()).unwrap();
        reg.touch_history(&"c".into()).unwrap();
        reg.touch_history(&"b".into()).unwrap();

        let ids: Vec<_> = reg.history().into_iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_private_never_enters_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = CollectionRegistry::load(&dir.path().join("registry.json"), 10).unwrap();
        reg.add(entry("secret", true)).unwrap();
        reg.touch_history(&"secret".into()).unwrap();
        assert!(reg.history().is_empty());
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn test_marking_private_scrubs_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = CollectionRegistry::load(&dir.path().join("registry.json"), 10).unwrap();
        reg.add(entry("a", false)).unwrap();
        reg.touch_history(&"a".into()).unwrap();
        reg.update(&"a".into(), |e| e.private = true).unwrap();
        assert!(reg.history().is_empty());
    }

    #[test]
    fn test_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let mut reg = CollectionRegistry::load(&path, 10).unwrap();
            reg.add(entry("a", false)).unwrap();
            reg.touch_history(&"a".into()).unwrap();
        }
        let reg = CollectionRegistry::load(&path, 10).unwrap();
        assert_eq!(reg.history().len(), 1);
        assert!(!dir.path().join("registry.json.tmp").exists());
    }

    #[test]
    fn test_garbled_registry_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CollectionRegistry::load(&path, 10), Err(EngineError::Corrupt(_))));
    }
}
