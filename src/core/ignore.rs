// FILE: src/core/ignore.rs
//! Decides which paths under a root are candidates for indexing.
//!
//! Two layers:
//! 1. System noise: hidden files, backups, OS metadata (Thumbs.db and friends)
//! 2. Per-root rules from a `.medialibignore` file, one name per line,
//!    matched against every path component below the root

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const IGNORE_FILE: &str = ".medialibignore";

const IGNORED_EXACT: &[&str] = &[
    "thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    "icon\r",
    "autorun.inf",
    "$recycle.bin",
    "system volume information",
    "@eadir",
];

const IGNORED_EXTENSIONS: &[&str] = &[
    // Swap/Temp
    "swp", "tmp", "bak", "partial", "crdownload",
];

pub struct Bouncer;

impl Bouncer {
    /// True for names that are never user media.
    pub fn is_noise(name: &str) -> bool {
        if name.starts_with('.') || name.ends_with('~') {
            return true;
        }

        let name_lower = name.to_lowercase();
        if IGNORED_EXACT.contains(&name_lower.as_str()) {
            return true;
        }

        match name_lower.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => IGNORED_EXTENSIONS.contains(&ext),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct IgnoreRules {
    rules: HashMap<PathBuf, HashSet<String>>,
    /// Directories never descended into, e.g. the engine's own data dir
    excluded: Vec<PathBuf>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_dir(&mut self, dir: impl Into<PathBuf>) {
        self.excluded.push(dir.into());
    }

    pub fn load_rules_for_root(&mut self, root: &Path) {
        let mut rules = HashSet::new();
        rules.insert(IGNORE_FILE.to_string());

        if let Ok(content) = fs::read_to_string(root.join(IGNORE_FILE)) {
            for line in content.lines() {
                let rule = line.trim();
                if !rule.is_empty() && !rule.starts_with('#') {
                    rules.insert(rule.to_string());
                }
            }
        }
        self.rules.insert(root.to_path_buf(), rules);
    }

    /// Whether `path`, found while walking `root`, should be skipped.
    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        if self.excluded.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }

        let relative = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => return false,
        };
        let rules = self.rules.get(root);

        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            Bouncer::is_noise(&name) || rules.map_or(false, |r| r.contains(name.as_ref()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise() {
        assert!(Bouncer::is_noise(".DS_Store"));
        assert!(Bouncer::is_noise("Thumbs.db"));
        assert!(Bouncer::is_noise("IMG_0001.JPG~"));
        assert!(Bouncer::is_noise("upload.crdownload"));
        assert!(!Bouncer::is_noise("IMG_0001.JPG"));
        assert!(!Bouncer::is_noise("README"));
    }

    #[test]
    fn test_rules_file_applies_to_components() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(IGNORE_FILE), "# comment\nexports\n\nraw\n").unwrap();

        let mut rules = IgnoreRules::new();
        rules.load_rules_for_root(root);

        assert!(rules.is_ignored(root, &root.join("exports/a.jpg")));
        assert!(rules.is_ignored(root, &root.join("2023/raw/b.cr2")));
        assert!(rules.is_ignored(root, &root.join(IGNORE_FILE)));
        assert!(!rules.is_ignored(root, &root.join("2023/c.jpg")));
        // Hidden directories anywhere below the root
        assert!(rules.is_ignored(root, &root.join(".cache/d.jpg")));
    }

    #[test]
    fn test_excluded_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut rules = IgnoreRules::new();
        rules.exclude_dir(root.join("medialib-data"));
        rules.load_rules_for_root(root);
        assert!(rules.is_ignored(root, &root.join("medialib-data/catalog.db")));
        assert!(!rules.is_ignored(root, &root.join("photos/e.jpg")));
    }
}
