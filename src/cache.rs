//! Time-bounded cache for resolved stream locators
//!
//! Entries carry an absolute expiry and are checked lazily: an expired entry is
//! evicted by the read that finds it. There is no background sweeper.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::utils::{Clock, SystemClock};

/// Default lifetime of a resolved stream URL
pub const LOCATOR_TTL: Duration = Duration::from_secs(120 * 60);

/// Which stream of a track a locator points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    Audio,
    Video,
}

/// Cache key: one entry per track and stream kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocatorKey {
    pub track_id: String,
    pub kind: LocatorKind,
}

impl LocatorKey {
    pub fn audio(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            kind: LocatorKind::Audio,
        }
    }

    pub fn video(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            kind: LocatorKind::Video,
        }
    }
}

/// A cached value with its absolute expiry
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at_ms: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they were found expired
    pub evictions: u64,
}

/// Key -> (value, expiry) store with evict-on-read semantics
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            stats: CacheStats::default(),
        }
    }

    /// Look up a value. Misses when absent or when `now >= expires_at`;
    /// in the latter case the entry is removed.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at_ms => {
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!("Cache entry expired, evicting");
                self.entries.remove(key);
                self.stats.evictions += 1;
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a value that lives for `ttl` from now
    pub fn put(&mut self, key: K, value: V, ttl: Duration) {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(ttl.as_millis() as u64);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at_ms,
            },
        );
    }

    /// Drop a single entry, returning whether it existed
    pub fn invalidate(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of stored entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// Cache used by the playback session for stream URLs
pub type LocatorCache = TtlCache<LocatorKey, String>;
