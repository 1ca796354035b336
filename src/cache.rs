// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: cache  —  C4 Object Cache
//
//  Grounded on the teacher's `CacheManifest` (hash_file/hash_str, obj_path)
//  but extended per §4.4: hardlink-preferred restore, a `.meta.json`
//  sidecar per entry, and size/age-bounded maintenance.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BuilderError, Result};

/// Layout: `<cacheRoot>/<2-hex>/<32-hex>.o` + sibling `.meta.json`.
const META_SUFFIX: &str = ".meta.json";
const MAINTENANCE_SENTINEL: &str = ".last_maintenance";
const MAINTENANCE_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_ENTRIES: u64 = 50_000;
const MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Uniquely identifies a compile action: compiler path, canonicalized
/// arguments, and source path (§3 WorkItem identity).
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub compiler_path: PathBuf,
    pub args: Vec<String>,
    pub source_path: PathBuf,
}

impl WorkItem {
    /// Canonical-args form: substitute `-I` paths and the source path as
    /// given by the caller, drop the output argument, sort alphabetically,
    /// then append a compiler-version token (the compiler binary's mtime).
    fn canonical_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .filter(|a| *a != "-o")
            .cloned()
            .collect();
        args.sort();
        let version_token = std::fs::metadata(&self.compiler_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().to_string())
            .unwrap_or_default();
        args.push(format!("compiler-mtime:{version_token}"));
        args
    }

    /// The 128-bit (32 hex char) cache key: the first 16 bytes of a
    /// SHA-256 digest over the canonical triple (§3, §9 open question 5).
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.compiler_path.to_string_lossy().as_bytes());
        for arg in self.canonical_args() {
            hasher.update(b"\0");
            hasher.update(arg.as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(self.source_path.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    source_path: String,
    args: Vec<String>,
    compiler_path: String,
    size: u64,
    inserted_at_secs: u64,
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub count: u64,
    pub bytes: u64,
    pub hard_links: u64,
    pub copies: u64,
}

pub struct ObjectCache {
    root: PathBuf,
    hard_links: std::sync::atomic::AtomicU64,
    copies: std::sync::atomic::AtomicU64,
}

impl ObjectCache {
    pub fn new(root: PathBuf) -> Self {
        ObjectCache { root, hard_links: Default::default(), copies: Default::default() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(&key[..2]).join(format!("{key}.o"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(&key[..2]).join(format!("{key}{META_SUFFIX}"))
    }

    /// `has(key)`: both blob and meta exist, and the source file's mtime is
    /// no newer than the blob's (§4.4 invariant).
    pub fn has(&self, key: &str, source_path: &Path) -> bool {
        let blob = self.blob_path(key);
        let meta = self.meta_path(key);
        if !blob.exists() || !meta.exists() {
            return false;
        }
        let (Ok(blob_meta), Ok(src_meta)) = (std::fs::metadata(&blob), std::fs::metadata(source_path)) else {
            return false;
        };
        let (Ok(blob_mtime), Ok(src_mtime)) = (blob_meta.modified(), src_meta.modified()) else {
            return false;
        };
        src_mtime <= blob_mtime
    }

    /// Restores a cached blob to `target_path`, preferring a hardlink and
    /// falling back to a byte-copy on any failure (cross-device, perms).
    pub fn restore(&self, key: &str, source_path: &Path, target_path: &Path) -> Result<bool> {
        if !self.has(key, source_path) {
            return Ok(false);
        }
        let blob = self.blob_path(key);
        if let Some(parent) = target_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(target_path);
        match std::fs::hard_link(&blob, target_path) {
            Ok(()) => {
                self.hard_links.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(true)
            }
            Err(_) => match std::fs::copy(&blob, target_path) {
                Ok(_) => {
                    self.copies.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    Ok(true)
                }
                Err(e) => Err(BuilderError::CacheIo(e.to_string())),
            },
        }
    }

    /// Stores `object_path`'s bytes under `key`, overwriting any prior
    /// entry. Hardlink-first, copy fallback, same as `restore`.
    pub fn store(&self, item: &WorkItem, key: &str, object_path: &Path) -> Result<()> {
        let blob = self.blob_path(key);
        let meta = self.meta_path(key);
        if let Some(parent) = blob.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(&blob);
        if std::fs::hard_link(object_path, &blob).is_err() {
            std::fs::copy(object_path, &blob).map_err(|e| BuilderError::CacheIo(e.to_string()))?;
        }

        let size = std::fs::metadata(&blob).map(|m| m.len()).unwrap_or(0);
        let meta_content = Meta {
            source_path: item.source_path.to_string_lossy().into_owned(),
            args: item.args.clone(),
            compiler_path: item.compiler_path.to_string_lossy().into_owned(),
            size,
            inserted_at_secs: now_secs(),
        };
        let json = serde_json::to_string_pretty(&meta_content).map_err(|e| BuilderError::CacheIo(e.to_string()))?;
        std::fs::write(&meta, json)?;
        Ok(())
    }

    /// Aggregates cache size by walking the root (§4.4).
    pub fn stats(&self) -> CacheStats {
        let mut count = 0;
        let mut bytes = 0;
        for entry in walkdir::WalkDir::new(&self.root).into_iter().flatten() {
            if entry.file_type().is_file() && entry.path().extension().and_then(|e| e.to_str()) == Some("o") {
                count += 1;
                bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        CacheStats {
            count,
            bytes,
            hard_links: self.hard_links.load(std::sync::atomic::Ordering::Relaxed),
            copies: self.copies.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Deletes entries older than `max_age_days` (when given), restricted
    /// to keys matching `pattern` as a substring (when given), then any
    /// now-empty prefix directories.
    pub fn sweep(&self, max_age_days: Option<u64>, pattern: Option<&str>) -> Result<u64> {
        let cutoff = max_age_days.map(|days| now_secs().saturating_sub(days * 24 * 60 * 60));
        let mut removed = 0;

        for entry in walkdir::WalkDir::new(&self.root).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("o") {
                continue;
            }
            let key = entry.path().file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            if let Some(p) = pattern {
                if !key.contains(p) {
                    continue;
                }
            }
            if let Some(cutoff) = cutoff {
                let mtime_secs = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                if mtime_secs >= cutoff {
                    continue;
                }
            }
            let _ = std::fs::remove_file(entry.path());
            let _ = std::fs::remove_file(self.meta_path(&key));
            removed += 1;
        }

        remove_empty_dirs(&self.root);
        Ok(removed)
    }

    /// Runs at most once every 30 days (sentinel persisted at the cache
    /// root). Sweeps entries >30 days old if over bounds, then >7 days old
    /// if still over (§4.4).
    pub fn maintain(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let sentinel = self.root.join(MAINTENANCE_SENTINEL);
        if let Ok(text) = std::fs::read_to_string(&sentinel) {
            if let Ok(last) = text.trim().parse::<u64>() {
                if now_secs().saturating_sub(last) < MAINTENANCE_INTERVAL_SECS {
                    return Ok(());
                }
            }
        }

        let stats = self.stats();
        if stats.count > MAX_ENTRIES || stats.bytes > MAX_BYTES {
            self.sweep(Some(30), None)?;
            let stats = self.stats();
            if stats.count > MAX_ENTRIES || stats.bytes > MAX_BYTES {
                self.sweep(Some(7), None)?;
            }
        }

        std::fs::write(&sentinel, now_secs().to_string())?;
        Ok(())
    }
}

fn remove_empty_dirs(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let _ = std::fs::remove_dir(&path);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(suffix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("anvil-cache-test-{suffix}-{}", std::process::id()))
    }

    #[test]
    fn cache_key_is_deterministic() {
        let item = WorkItem {
            compiler_path: PathBuf::from("/usr/bin/avr-g++"),
            args: vec!["-Os".to_string(), "-Wall".to_string()],
            source_path: PathBuf::from("/tmp/sketch.cpp"),
        };
        assert_eq!(item.cache_key(), item.cache_key());
        assert_eq!(item.cache_key().len(), 32);
    }

    #[test]
    fn store_then_restore_roundtrips_bytes() {
        let root = tmp_dir("roundtrip");
        let cache = ObjectCache::new(root.clone());

        let src = root.join("src.cpp");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(&src, "int main(){}\n").unwrap();

        let obj = root.join("src.o");
        std::fs::write(&obj, b"fake object bytes").unwrap();

        let item = WorkItem {
            compiler_path: PathBuf::from("/usr/bin/avr-g++"),
            args: vec![],
            source_path: src.clone(),
        };
        let key = item.cache_key();
        cache.store(&item, &key, &obj).unwrap();
        assert!(cache.has(&key, &src));

        let restored = root.join("restored.o");
        assert!(cache.restore(&key, &src, &restored).unwrap());
        assert_eq!(std::fs::read(&restored).unwrap(), std::fs::read(&obj).unwrap());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn newer_source_invalidates_hit() {
        let root = tmp_dir("invalidate");
        std::fs::create_dir_all(&root).unwrap();
        let cache = ObjectCache::new(root.clone());

        let src = root.join("src.cpp");
        std::fs::write(&src, "int main(){}\n").unwrap();
        let obj = root.join("src.o");
        std::fs::write(&obj, b"bytes").unwrap();

        let item = WorkItem { compiler_path: PathBuf::from("/usr/bin/avr-g++"), args: vec![], source_path: src.clone() };
        let key = item.cache_key();
        cache.store(&item, &key, &obj).unwrap();
        assert!(cache.has(&key, &src));

        let future = SystemTime::now() + std::time::Duration::from_secs(60);
        let f = std::fs::File::open(&src).unwrap();
        f.set_modified(future).unwrap();
        assert!(!cache.has(&key, &src));

        let _ = std::fs::remove_dir_all(&root);
    }
}
