//! Content fingerprints
//!
//! SHA-256 over the full file contents, memoised per (path, size, mtime) so a
//! file is hashed at most once while it stays unchanged.

use crate::model::Fingerprint;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FingerprintKey {
    path: PathBuf,
    size: u64,
    mtime: i64,
    mtime_nsec: u32,
}

pub struct FingerprintService {
    cache: Mutex<LruCache<FingerprintKey, Fingerprint>>,
    computed: AtomicU64,
}

impl FingerprintService {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            computed: AtomicU64::new(0),
        }
    }

    /// Fingerprint for a file whose size and mtime the caller already stat'ed.
    pub fn fingerprint(&self, path: &Path, size: u64, mtime: i64, mtime_nsec: u32) -> io::Result<Fingerprint> {
        let key = FingerprintKey { path: path.to_path_buf(), size, mtime, mtime_nsec };

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(*hit);
            }
        }

        let fingerprint = Self::compute(path)?;
        self.computed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, fingerprint);
        }
        Ok(fingerprint)
    }

    /// Number of digests actually computed (cache misses).
    pub fn computed(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn compute(path: &Path) -> io::Result<Fingerprint> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Ok(Fingerprint::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abc.bin");
        std::fs::write(&file, b"abc").unwrap();

        let fp = FingerprintService::compute(&file).unwrap();
        assert_eq!(
            fp.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cache_keyed_on_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"first").unwrap();

        let service = FingerprintService::new(8);
        let a = service.fingerprint(&file, 5, 100, 0).unwrap();
        let b = service.fingerprint(&file, 5, 100, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(service.computed(), 1);

        std::fs::write(&file, b"second").unwrap();
        let c = service.fingerprint(&file, 6, 101, 0).unwrap();
        assert_ne!(a, c);
        assert_eq!(service.computed(), 2);
    }

    #[test]
    fn test_missing_file_errors() {
        let service = FingerprintService::new(1);
        assert!(service.fingerprint(Path::new("/definitely/not/here"), 0, 0, 0).is_err());
    }
}
