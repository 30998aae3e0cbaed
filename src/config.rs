//! Engine configuration
//!
//! Defaults are usable as-is; `load` reads a JSON file and `from_env` applies
//! `MEDIALIB_*` overrides on top of the defaults.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_DATA_DIR: &str = "MEDIALIB_DATA_DIR";
const ENV_WORKERS: &str = "MEDIALIB_WORKERS";
const ENV_EXIFTOOL: &str = "MEDIALIB_EXIFTOOL";
const ENV_LOG: &str = "MEDIALIB_LOG";

const MAX_DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of all persisted state (registry + one directory per collection)
    pub data_dir: PathBuf,
    /// Upper bound on concurrent extraction/fingerprint jobs during a build
    pub max_workers: usize,
    /// Program invoked by the exiftool adapter
    pub exiftool_path: PathBuf,
    /// Rows per write transaction in the build writer
    pub write_batch_size: usize,
    /// Rows fetched per page by a lazy result set
    pub page_size: usize,
    pub fingerprint_cache_capacity: usize,
    /// Maximum entries kept in the recently-opened list
    pub history_limit: usize,
    /// Default tracing directive when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("medialib");
        let max_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .min(MAX_DEFAULT_WORKERS);

        Self {
            data_dir,
            max_workers,
            exiftool_path: PathBuf::from("exiftool"),
            write_batch_size: 256,
            page_size: 500,
            fingerprint_cache_capacity: 4096,
            history_limit: 20,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Config rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::info!("[Config] Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var(ENV_WORKERS) {
            config.max_workers = workers.parse().map_err(|_| {
                EngineError::State(format!("{} must be a positive integer, got '{}'", ENV_WORKERS, workers))
            })?;
        }
        if let Ok(tool) = std::env::var(ENV_EXIFTOOL) {
            config.exiftool_path = PathBuf::from(tool);
        }
        if let Ok(filter) = std::env::var(ENV_LOG) {
            config.log_filter = filter;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(EngineError::State("max_workers must be at least 1".into()));
        }
        if self.write_batch_size == 0 || self.page_size == 0 {
            return Err(EngineError::State("batch and page sizes must be at least 1".into()));
        }
        if self.fingerprint_cache_capacity == 0 {
            return Err(EngineError::State("fingerprint_cache_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn registry_file(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(&file, r#"{ "data_dir": "/srv/media", "max_workers": 3 }"#).unwrap();

        let config = EngineConfig::load(&file).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.exiftool_path, PathBuf::from("exiftool"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig { max_workers: 0, ..EngineConfig::default() };
        assert!(matches!(config.validate(), Err(EngineError::State(_))));
    }

    #[test]
    fn test_layout_paths() {
        let config = EngineConfig::with_data_dir("/data");
        assert_eq!(config.registry_file(), PathBuf::from("/data/registry.json"));
        assert_eq!(config.collections_dir(), PathBuf::from("/data/collections"));
    }
}
