//! The caching config resolver.

use crate::cache::{CacheOptions, CacheStats, TtlCache};
use crate::merge::apply_override;
use parley_core::generation::{ConfigOverride, GenerationConfig, Resolution, ResolutionSource};
use parley_core::store::ConfigStore;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cache key of the provider-wide free default.
pub const FREE_DEFAULT_KEY: &str = "__free_default__";

/// The provider-wide free/guest default record.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeDefault {
    pub config: ConfigOverride,
}

impl FreeDefault {
    /// Overlay the free default onto a persona's defaults.
    pub fn apply(&self, persona_defaults: &GenerationConfig) -> Resolution {
        Resolution {
            config: apply_override(persona_defaults, &self.config),
            source: ResolutionSource::FreeDefault,
            name: self.config.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Cached {
    Resolution(Resolution),
    FreeDefault(Option<FreeDefault>),
}

/// Resolves and caches effective generation configs.
///
/// One instance is shared by every in-flight turn. Construct it inside a
/// Tokio runtime to get the background sweep; call [`stop_cleanup`] (or drop
/// it) to stop the sweep.
///
/// [`stop_cleanup`]: ConfigResolver::stop_cleanup
pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    cache: TtlCache<Cached>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    lookups: AtomicU64,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>, options: CacheOptions) -> Self {
        let cache = TtlCache::new(options.ttl);
        let sweeper = if options.sweep_enabled && !options.sweep_interval.is_zero() {
            cache.spawn_sweeper(options.sweep_interval)
        } else {
            None
        };

        Self {
            store,
            cache,
            sweeper: Mutex::new(sweeper),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    fn cache_key(user_id: &str, persona_id: &str) -> String {
        format!("{user_id}:{persona_id}")
    }

    /// Resolve the effective config for `user_id` talking to `persona_id`.
    ///
    /// Never fails: a missing user, a missing override, or a store error
    /// all yield the persona defaults.
    pub async fn resolve(
        &self,
        user_id: Option<&str>,
        persona_id: &str,
        persona_defaults: &GenerationConfig,
    ) -> Resolution {
        let Some(user_id) = user_id.filter(|id| !id.is_empty()) else {
            return Resolution::persona(persona_defaults);
        };

        let key = Self::cache_key(user_id, persona_id);
        if let Some(Cached::Resolution(cached)) = self.cache.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(user_id, persona_id, source = %cached.source, "Config cache hit");
            return cached;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let record = match self.store.find_user(user_id, persona_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id, persona_id, error = %e, "Config lookup failed; using persona defaults");
                return Resolution::persona(persona_defaults);
            }
        };

        let resolution = match record {
            None => {
                debug!(user_id, "No user record; using persona defaults");
                Resolution::persona(persona_defaults)
            }
            Some(record) => {
                if let Some(over) = record.persona_override {
                    Resolution {
                        config: apply_override(persona_defaults, &over),
                        source: ResolutionSource::UserPersona,
                        name: over.name,
                    }
                } else if let Some(over) = record.default_override {
                    Resolution {
                        config: apply_override(persona_defaults, &over),
                        source: ResolutionSource::UserDefault,
                        name: over.name,
                    }
                } else {
                    Resolution::persona(persona_defaults)
                }
            }
        };

        debug!(user_id, persona_id, source = %resolution.source, model = %resolution.config.model, "Resolved config");
        self.cache
            .insert(key, Cached::Resolution(resolution.clone()))
            .await;
        resolution
    }

    /// The provider-wide free default, if one is flagged in the store.
    ///
    /// Cached under [`FREE_DEFAULT_KEY`] with the same TTL as user entries;
    /// "no free default" is cached too. Store errors yield `None` uncached.
    pub async fn resolve_free_default(&self) -> Option<FreeDefault> {
        if let Some(Cached::FreeDefault(cached)) = self.cache.get(FREE_DEFAULT_KEY).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cached;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let free = match self.store.find_free_default().await {
            Ok(config) => config.map(|config| FreeDefault { config }),
            Err(e) => {
                warn!(error = %e, "Free default lookup failed");
                return None;
            }
        };

        self.cache
            .insert(FREE_DEFAULT_KEY, Cached::FreeDefault(free.clone()))
            .await;
        free
    }

    /// Drop every cached resolution for `user_id`. Returns how many were removed.
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        let removed = self.cache.remove_prefix(&format!("{user_id}:")).await;
        debug!(user_id, removed, "Invalidated cached configs");
        removed
    }

    /// Empty the whole cache, free default included.
    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    /// Evict expired entries now. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        self.cache.sweep().await
    }

    /// Stop the background sweep. Cached entries stay usable.
    pub fn stop_cleanup(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }

    /// Whether the background sweep is running.
    pub fn cleanup_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|s| s.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ConfigResolver {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}
