//! Compile Cache
//!
//! Maps pipeline fingerprints to on-disk build artifacts. The cache is
//! additive within a process: `clear` drops in-memory entries only, leaving
//! artifact files on disk for a later process (or a later `clear`-surviving
//! driver probe) to pick up. There is no eviction; the working set is one
//! entry per distinct pipeline shape.
//!
//! Validity is purely "the artifact file is still there and readable" — the
//! cache does not hash artifacts, so external tampering is out of scope.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Instant;

/// One cached compilation.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    /// Emitted source; kept for debugging, allowed to disappear.
    pub source_path: PathBuf,
    /// Compiled shared object.
    pub so_path: PathBuf,
    pub compile_time: Instant,
}

/// Thread-safe fingerprint -> artifact map.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// An entry is valid iff it exists and its artifact is readable.
    pub fn is_valid(&self, fingerprint: &str) -> bool {
        self.entries
            .read()
            .map(|e| {
                e.get(fingerprint)
                    .map(|entry| fs::metadata(&entry.so_path).is_ok())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn add(&self, entry: CacheEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.fingerprint.clone(), entry);
        }
    }

    pub fn remove(&self, fingerprint: &str) -> Option<CacheEntry> {
        self.entries
            .write()
            .ok()
            .and_then(|mut e| e.remove(fingerprint))
    }

    /// Drop all in-memory entries. Artifact files stay on disk.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.get(fingerprint).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fingerprint: &str, so_path: PathBuf) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.to_string(),
            source_path: so_path.with_extension("cpp"),
            so_path,
            compile_time: Instant::now(),
        }
    }

    #[test]
    fn test_add_get_remove() {
        let cache = CompileCache::new();
        assert!(cache.is_empty());

        cache.add(entry("abc", PathBuf::from("/nonexistent/lib.so")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("abc").map(|e| e.fingerprint), Some("abc".into()));
        assert!(cache.get("def").is_none());

        cache.remove("abc");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_validity_requires_artifact_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let so_path = dir.path().join("libpipeline_x.so");

        let cache = CompileCache::new();
        cache.add(entry("x", so_path.clone()));
        // Entry present but artifact missing.
        assert!(!cache.is_valid("x"));

        fs::write(&so_path, b"not really an so").expect("write");
        assert!(cache.is_valid("x"));

        fs::remove_file(&so_path).expect("remove");
        assert!(!cache.is_valid("x"));
    }

    #[test]
    fn test_clear_is_in_memory_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let so_path = dir.path().join("libpipeline_y.so");
        fs::write(&so_path, b"artifact").expect("write");

        let cache = CompileCache::new();
        cache.add(entry("y", so_path.clone()));
        cache.clear();

        assert!(cache.is_empty());
        // The artifact survives for a fresh process to pick up.
        assert!(so_path.exists());
    }
}
