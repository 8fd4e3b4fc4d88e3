//! A string-keyed TTL cache with an optional background sweep.
//!
//! Reads check `expires_at > now`; expired entries are never served, only
//! reclaimed later by the sweep (or overwritten on the next insert). Locks
//! are held for the map operation only, never across an `.await` on I/O.

use parley_config::CacheConfig;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// TTL and sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub sweep_enabled: bool,
}

impl CacheOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
            sweep_enabled: config.sweep_enabled,
        }
    }

    /// Options with the background sweep turned off.
    pub fn without_sweep(ttl: Duration) -> Self {
        Self {
            ttl,
            sweep_interval: Duration::ZERO,
            sweep_enabled: false,
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held, fresh or not
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Store lookups issued on misses
    pub lookups: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

type EntryMap<V> = RwLock<HashMap<String, CacheEntry<V>>>;

/// The cache itself. Cloning is cheap and shares the underlying map.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Arc<EntryMap<V>>,
    ttl: Duration,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The value under `key`, if present and still fresh.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Insert or replace `key`, fresh for one TTL from now.
    pub async fn insert(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub async fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every entry with `expires_at <= now`. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        sweep_map(&self.entries).await
    }

    /// Start a task that sweeps every `interval`.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped. Returns `None` outside a Tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime; cache sweep disabled");
                return None;
            }
        };

        let weak: Weak<EntryMap<V>> = Arc::downgrade(&self.entries);
        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(entries) = weak.upgrade() else {
                    break;
                };
                let removed = sweep_map(&entries).await;
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        }))
    }
}

async fn sweep_map<V>(entries: &EntryMap<V>) -> usize {
    let now = Instant::now();
    let mut entries = entries.write().await;
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
}
