//! Content-addressed result cache
//!
//! One JSON record per content digest under the cache directory. The cache
//! is an optimization only: read failures are misses and write failures are
//! logged, never returned.
//!
//! Eviction: when the scanned total exceeds the ceiling, entries are removed
//! oldest last access first (ties by digest, ascending) until the total fits.
//!
//! A record file and its index entry change together under that digest's
//! index entry lock, so a digest is indexed exactly when its file exists.
//! All methods do blocking file I/O; async callers go through
//! [`ContentAddressedCache::blocking`].

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::analysis::AnalysisSummary;
use crate::error::{Error, Result};

/// A cached result returned by [`ContentAddressedCache::get`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub digest: String,
    pub result: AnalysisSummary,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
}

/// On-disk layout of one record
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    digest: String,
    cached_at: DateTime<Utc>,
    result: AnalysisSummary,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    last_accessed: DateTime<Utc>,
    /// Logical access clock; orders eviction independent of wall-clock resolution
    access_seq: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
}

/// Size-bounded, digest-keyed result store
pub struct ContentAddressedCache {
    dir: PathBuf,
    max_size_bytes: u64,
    index: DashMap<String, IndexEntry>,
    access_clock: AtomicU64,
    eviction: Mutex<()>,
}

impl ContentAddressedCache {
    /// Open (or create) a cache directory and index its existing records
    pub fn open(dir: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Cache(format!("Failed to create cache dir {}: {}", dir.display(), e))
        })?;

        let cache = Self {
            dir,
            max_size_bytes,
            index: DashMap::new(),
            access_clock: AtomicU64::new(0),
            eviction: Mutex::new(()),
        };
        cache.load_index();
        tracing::info!(
            dir = %cache.dir.display(),
            entries = cache.index.len(),
            "Result cache opened"
        );
        Ok(cache)
    }

    /// Seed the index from records left by a previous run, oldest first
    fn load_index(&self) {
        let mut found: Vec<(String, DateTime<Utc>)> = self
            .record_files()
            .into_iter()
            .filter_map(|path| {
                let digest = path.file_stem()?.to_str()?.to_string();
                if !is_valid_digest(&digest) {
                    return None;
                }
                let meta = std::fs::metadata(&path).ok()?;
                let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
                Some((digest, modified))
            })
            .collect();
        found.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (digest, last_accessed) in found {
            let access_seq = self.tick();
            self.index.insert(
                digest,
                IndexEntry {
                    last_accessed,
                    access_seq,
                },
            );
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::SeqCst)
    }

    fn record_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{}.json", digest))
    }

    fn record_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(e) => {
                tracing::error!("Failed to list cache dir {}: {}", self.dir.display(), e);
                Vec::new()
            }
        }
    }

    /// Look up a result. Missing, unreadable and corrupt records are all misses.
    pub fn get(&self, digest: &str) -> Option<CacheEntry> {
        if !is_valid_digest(digest) {
            tracing::warn!(digest, "Rejected malformed cache key");
            return None;
        }

        let path = self.record_path(digest);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(digest, "Error reading cache: {}", e);
                }
                // a concurrent put may have landed since the read
                self.index.remove_if(digest, |_, _| !path.exists());
                tracing::debug!(digest, "Cache miss");
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(digest, "Discarding corrupt cache record: {}", e);
                self.delete(digest);
                return None;
            }
        };

        let now = Utc::now();
        match self.index.entry(digest.to_string()) {
            Entry::Occupied(mut indexed) => {
                let indexed = indexed.get_mut();
                indexed.last_accessed = now;
                indexed.access_seq = self.tick();
            }
            Entry::Vacant(slot) => {
                // evicted between the read and now
                if !path.exists() {
                    tracing::debug!(digest, "Cache record removed while reading");
                    return None;
                }
                slot.insert(IndexEntry {
                    last_accessed: now,
                    access_seq: self.tick(),
                });
            }
        }

        tracing::debug!(digest, "Cache hit");
        Some(CacheEntry {
            digest: digest.to_string(),
            result: record.result,
            size_bytes: bytes.len() as u64,
            last_accessed: now,
        })
    }

    /// Store a result, replacing any previous record for the digest
    pub fn put(&self, digest: &str, result: &AnalysisSummary) {
        if let Err(e) = self.try_put(digest, result) {
            tracing::error!(digest, "Error writing cache: {}", e);
            return;
        }
        self.evict_to_fit();
    }

    fn try_put(&self, digest: &str, result: &AnalysisSummary) -> Result<()> {
        if !is_valid_digest(digest) {
            return Err(Error::Cache(format!("malformed digest '{}'", digest)));
        }

        let now = Utc::now();
        let record = CacheRecord {
            digest: digest.to_string(),
            cached_at: now,
            result: result.clone(),
        };
        let bytes = serde_json::to_vec(&record)?;

        // temp file + rename: concurrent writers of one digest never interleave
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;

        let entry = self.index.entry(digest.to_string());
        tmp.persist(self.record_path(digest))
            .map_err(|e| Error::Cache(e.to_string()))?;
        entry.insert(IndexEntry {
            last_accessed: now,
            access_seq: self.tick(),
        });

        tracing::debug!(digest, size = bytes.len(), "Cached results");
        Ok(())
    }

    /// Remove one record. Absent digests are a no-op.
    pub fn delete(&self, digest: &str) {
        if self.remove_record(digest).is_some() {
            tracing::info!(digest, "Deleted cache record");
        }
    }

    /// Remove a record file and its index entry; returns the bytes freed
    fn remove_record(&self, digest: &str) -> Option<u64> {
        if !is_valid_digest(digest) {
            return None;
        }
        let entry = self.index.entry(digest.to_string());
        let path = self.record_path(digest);
        let size = std::fs::metadata(&path).map(|m| m.len()).ok();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(digest, "Error deleting cache record: {}", e);
                return None;
            }
        }
        if let Entry::Occupied(indexed) = entry {
            indexed.remove();
        }
        size
    }

    /// Remove every record
    pub fn clear(&self) {
        for path in self.record_files() {
            let digest = path.file_stem().and_then(|s| s.to_str()).filter(|d| is_valid_digest(d));
            if let Some(digest) = digest {
                self.remove_record(digest);
            } else if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!("Error deleting {}: {}", path.display(), e);
                }
            }
        }
        self.index.retain(|digest, _| self.record_path(digest).exists());
        tracing::info!("Cleared all cache");
    }

    /// Total bytes of all records, by scanning the directory
    pub fn total_size(&self) -> u64 {
        self.record_files()
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Number of indexed records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            total_size: self.total_size(),
            max_size: self.max_size_bytes,
        }
    }

    fn evict_to_fit(&self) {
        let _guard = self.eviction.lock();

        let mut total = self.total_size();
        if total <= self.max_size_bytes {
            return;
        }

        let mut candidates: Vec<(u64, String)> = self
            .index
            .iter()
            .map(|e| (e.value().access_seq, e.key().clone()))
            .collect();
        candidates.sort();

        let mut evicted = 0usize;
        for (_, digest) in candidates {
            if total <= self.max_size_bytes {
                break;
            }
            // only bytes actually freed count; a concurrent delete frees nothing here
            if let Some(freed) = self.remove_record(&digest) {
                total = total.saturating_sub(freed);
                evicted += 1;
            }
        }

        tracing::info!(evicted, total_size = total, "Evicted cache records");
    }

    /// Run cache work on the blocking pool
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&ContentAddressedCache) -> T + Send + 'static,
        T: Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&cache))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))
    }

    /// When a record was last read or written, if indexed
    pub fn last_accessed(&self, digest: &str) -> Option<DateTime<Utc>> {
        self.index.get(digest).map(|e| e.last_accessed)
    }
}

/// Cache keys are SHA-256 hex digests
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit())
}
