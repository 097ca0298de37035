//! Content-addressed memo of prior validation results.
//!
//! Keys are a SHA-256 over (platform, record identifier, serialized record),
//! so any change to a record's content produces a new key. Entries expire
//! after a TTL and the cache holds at most `capacity` entries, evicting the
//! single oldest-inserted entry when full (insertion order, not LRU).
//!
//! Correctness invariant: a hit must be byte-identical to what fresh
//! validation and normalization would produce for the same input. Callers
//! must therefore [`flush`](ValidationCache::flush) on any rule-table
//! change; the cache cannot observe those.
//!
//! Reads are concurrent, writes exclusive. Two batches racing on a
//! miss-then-populate sequence may both compute and insert the same entry;
//! the duplicate write is idempotent and harmless.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Platform, RawRecord, ValidationResult};

struct CacheEntry {
    result: ValidationResult,
    inserted_at: Instant,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Bounded, TTL-evicting cache of validation results.
pub struct ValidationCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

impl ValidationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Compute the content-addressed key for one record on one platform.
    pub fn key_for(platform: Platform, record: &RawRecord) -> PipelineResult<String> {
        let serialized = serde_json::to_string(record)
            .map_err(|e| PipelineError::Fatal(format!("record serialization failed: {}", e)))?;
        let mut hasher = Sha256::new();
        hasher.update(platform.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(record.identifier().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(serialized.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Look up a prior result. Expired entries are evicted and count as
    /// misses.
    pub fn get(&self, key: &str) -> Option<ValidationResult> {
        {
            let inner = self.inner.read().unwrap();
            match inner.map.get(key) {
                Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                    return Some(entry.result.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: take the write lock to evict.
        let mut inner = self.inner.write().unwrap();
        if let Some(entry) = inner.map.get(key) {
            if entry.inserted_at.elapsed() > self.ttl {
                inner.map.remove(key);
                inner.order.retain(|k| k != key);
            } else {
                // Repopulated by a racing writer since we dropped the read
                // lock; serve it.
                return Some(inner.map[key].result.clone());
            }
        }
        None
    }

    /// Insert a result, evicting the oldest entry when at capacity.
    pub fn put(&self, key: String, result: ValidationResult) {
        let mut inner = self.inner.write().unwrap();
        if inner.map.contains_key(&key) {
            // Idempotent duplicate population; refresh the value in place.
            inner.map.insert(
                key,
                CacheEntry {
                    result,
                    inserted_at: Instant::now(),
                },
            );
            return;
        }
        while inner.map.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.map.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry. Must be called when rule tables change.
    pub fn flush(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
