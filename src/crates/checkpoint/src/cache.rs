//! Bounded LRU cache of checkpoints with per-entry TTL
//!
//! The service layer consults this cache before going to the repository. All
//! operations take one lock over the whole cache, so a reader never observes a
//! half-applied eviction. Entries hold an [`Arc<Checkpoint>`]; `get` hands out the
//! shared pointer, not a copy.
//!
//! Expiry is checked lazily on `get`/`contains`; [`CheckpointCache::cleanup_expired`]
//! sweeps everything and is meant for periodic background invocation.

use crate::checkpoint::Checkpoint;
use crate::settings::CacheSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    checkpoint: Arc<Checkpoint>,
    created_at: Instant,
    expires_at: Option<Instant>,
    /// Recency stamp; the smallest live stamp is the LRU entry
    last_used: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expiry) if now > expiry)
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
    pub entries: usize,
    pub max_size: usize,
}

impl CacheStats {
    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions += 1;
            debug!(checkpoint_id = %key, "Evicted least recently used checkpoint from cache");
        }
    }
}

/// Thread-safe checkpoint cache
#[derive(Debug)]
pub struct CheckpointCache {
    state: Mutex<CacheState>,
    max_size: usize,
    default_ttl: Option<Duration>,
}

impl CheckpointCache {
    /// Create a cache holding at most `max_size` entries; `default_ttl` of `None` never expires
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size,
            default_ttl,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_size, settings.default_ttl())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Look up a live entry and mark it most recently used
    pub fn get(&self, checkpoint_id: &str) -> Option<Arc<Checkpoint>> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let expired = match state.entries.get(checkpoint_id) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.entries.remove(checkpoint_id);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        let stamp = state.tick();
        state.stats.hits += 1;
        let entry = state.entries.get_mut(checkpoint_id)?;
        entry.last_used = stamp;
        Some(Arc::clone(&entry.checkpoint))
    }

    /// Insert or overwrite an entry; `ttl` of `None` applies the default TTL
    pub fn set(
        &self,
        checkpoint_id: impl Into<String>,
        checkpoint: impl Into<Arc<Checkpoint>>,
        ttl: Option<Duration>,
    ) {
        if self.max_size == 0 {
            return;
        }

        let checkpoint_id = checkpoint_id.into();
        let now = Instant::now();
        let ttl = ttl.or(self.default_ttl);

        let mut state = self.state.lock();
        if !state.entries.contains_key(&checkpoint_id) && state.entries.len() >= self.max_size {
            state.evict_lru();
        }

        let stamp = state.tick();
        state.entries.insert(
            checkpoint_id,
            CacheEntry {
                checkpoint: checkpoint.into(),
                created_at: now,
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
                last_used: stamp,
            },
        );
    }

    /// Remove an entry, reporting whether one was present
    pub fn delete(&self, checkpoint_id: &str) -> bool {
        self.state.lock().entries.remove(checkpoint_id).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether a live entry exists; drops the entry if it has expired
    pub fn contains(&self, checkpoint_id: &str) -> bool {
        let mut state = self.state.lock();
        let expired = match state.entries.get(checkpoint_id) {
            None => return false,
            Some(entry) => entry.is_expired(Instant::now()),
        };

        if expired {
            state.entries.remove(checkpoint_id);
            state.stats.expirations += 1;
            false
        } else {
            true
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;

        if removed > 0 {
            debug!(removed, "Swept expired checkpoints from cache");
        }
        removed
    }

    /// Age of an entry, if present
    pub fn entry_age(&self, checkpoint_id: &str) -> Option<Duration> {
        self.state
            .lock()
            .entries
            .get(checkpoint_id)
            .map(|entry| entry.created_at.elapsed())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            max_size: self.max_size,
            ..state.stats.clone()
        }
    }
}

impl Default for CheckpointCache {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}
