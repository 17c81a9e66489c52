//! Content-addressed render cache.
//!
//! Renders are keyed by a [`Fingerprint`] of the validated score and the
//! normalized options. [`RenderCache`] keeps at most `capacity` entries
//! and evicts the oldest insertion first. Two concurrent misses on the
//! same key both render; the second insert simply replaces the first.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::envelope::RenderResponseEnvelope;
use crate::error::CacheError;
use crate::model::Score;
use crate::options::RenderOptions;

/// Entries kept when no capacity is configured.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

// ═══════════════════════════════════════════════════════════════════════
// Fingerprint
// ═══════════════════════════════════════════════════════════════════════

/// Hex SHA-256 of the canonical JSON form of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a validated score with its normalized options.
    ///
    /// Serializing through `serde_json::Value` sorts object keys, so the
    /// hash depends only on content.
    pub fn compute(score: &Score, options: &RenderOptions) -> Result<Self, serde_json::Error> {
        let canonical = serde_json::to_value((score, options))?;
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(Self(format!("{:x}", Sha256::digest(&bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Store abstraction
// ═══════════════════════════════════════════════════════════════════════

/// Where finished renders are kept. Implementations may be remote and
/// therefore fallible; callers treat an error as a miss.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &Fingerprint) -> Result<Option<Arc<RenderResponseEnvelope>>, CacheError>;

    /// Store a render; returns the key evicted to make room, if any.
    fn insert(
        &self,
        key: Fingerprint,
        value: Arc<RenderResponseEnvelope>,
    ) -> Result<Option<Fingerprint>, CacheError>;
}

// ═══════════════════════════════════════════════════════════════════════
// RenderCache
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Entries {
    map: HashMap<Fingerprint, Arc<RenderResponseEnvelope>>,
    /// Insertion order, oldest first
    order: VecDeque<Fingerprint>,
}

/// In-process FIFO cache.
pub struct RenderCache {
    capacity: usize,
    entries: RwLock<Entries>,
}

impl RenderCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: RwLock::new(Entries::default()) }
    }

    // A panic while holding the lock cannot leave the map and queue out of
    // step (each write is a single push or pop pair), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &Fingerprint) -> Option<Arc<RenderResponseEnvelope>> {
        self.read().map.get(key).cloned()
    }

    /// Insert a render. A new key at full capacity evicts the oldest
    /// entry, which is returned. An existing key keeps its place in the
    /// queue and only has its value replaced.
    pub fn insert(&self, key: Fingerprint, value: Arc<RenderResponseEnvelope>) -> Option<Fingerprint> {
        let mut entries = self.write();
        if let Some(slot) = entries.map.get_mut(&key) {
            *slot = value;
            return None;
        }

        let mut evicted = None;
        if entries.map.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.map.remove(&oldest);
                debug!(fingerprint = %oldest, "evicted oldest render");
                evicted = Some(oldest);
            }
        }
        entries.order.push_back(key.clone());
        entries.map.insert(key, value);
        evicted
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.read().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut entries = self.write();
        entries.map.clear();
        entries.order.clear();
    }

    /// Keys from oldest to newest insertion.
    pub fn keys(&self) -> Vec<Fingerprint> {
        self.read().order.iter().cloned().collect()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl CacheStore for RenderCache {
    fn get(&self, key: &Fingerprint) -> Result<Option<Arc<RenderResponseEnvelope>>, CacheError> {
        Ok(RenderCache::get(self, key))
    }

    fn insert(
        &self,
        key: Fingerprint,
        value: Arc<RenderResponseEnvelope>,
    ) -> Result<Option<Fingerprint>, CacheError> {
        Ok(RenderCache::insert(self, key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RenderMetadata;
    use crate::model::{DurationClass, Measure, Note};
    use std::collections::BTreeMap;

    fn envelope(tag: &str) -> Arc<RenderResponseEnvelope> {
        Arc::new(RenderResponseEnvelope {
            fingerprint: tag.into(),
            artifacts: BTreeMap::new(),
            metadata: RenderMetadata::default(),
        })
    }

    fn key(n: usize) -> Fingerprint {
        Fingerprint(format!("{n:064x}"))
    }

    fn score(pitch: u8) -> Score {
        Score::new(vec![Measure {
            index: 0,
            notes: vec![Note { pitch, duration: DurationClass::Quarter, velocity: 80 }],
        }])
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let opts = RenderOptions::default();
        let a = Fingerprint::compute(&score(60), &opts).unwrap();
        let b = Fingerprint::compute(&score(60), &opts).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let opts = RenderOptions::default();
        let base = Fingerprint::compute(&score(60), &opts).unwrap();
        assert_ne!(base, Fingerprint::compute(&score(61), &opts).unwrap());

        let mut pinned = opts.clone();
        pinned.stave_width = Some(250);
        assert_ne!(base, Fingerprint::compute(&score(60), &pinned).unwrap());
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let cache = RenderCache::new(3);
        for n in 0..3 {
            assert_eq!(cache.insert(key(n), envelope("v")), None);
        }
        assert_eq!(cache.insert(key(3), envelope("v")), Some(key(0)));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key(0)));
        assert_eq!(cache.keys(), vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn reinsert_replaces_in_place() {
        let cache = RenderCache::new(2);
        cache.insert(key(0), envelope("old"));
        cache.insert(key(1), envelope("v"));
        assert_eq!(cache.insert(key(0), envelope("new")), None);
        assert_eq!(cache.get(&key(0)).unwrap().fingerprint, "new");
        // key 0 is still the oldest
        assert_eq!(cache.insert(key(2), envelope("v")), Some(key(0)));
    }

    #[test]
    fn clear_empties_both_structures() {
        let cache = RenderCache::default();
        cache.insert(key(0), envelope("v"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        assert_eq!(cache.capacity(), DEFAULT_CACHE_CAPACITY);
    }
}
