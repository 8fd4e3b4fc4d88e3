//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use parley_core::error::StoreError;
use parley_core::generation::ConfigOverride;
use parley_core::store::{ConfigStore, UserRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct StoredUser {
    default_override: Option<ConfigOverride>,
    persona_overrides: HashMap<String, ConfigOverride>,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, StoredUser>,
    free_default: Option<ConfigOverride>,
    failure: Option<StoreError>,
}

/// A `HashMap`-backed store.
///
/// Counts every lookup it serves and can be told to fail, which lets tests
/// observe caching and degradation behaviour.
#[derive(Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    user_lookups: AtomicUsize,
    free_default_lookups: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with no overrides.
    pub async fn add_user(&self, user_id: &str) {
        self.state
            .write()
            .await
            .users
            .entry(user_id.to_string())
            .or_default();
    }

    /// Set (or replace) a user's global default, creating the user if needed.
    pub async fn set_user_default(&self, user_id: &str, config: ConfigOverride) {
        let mut state = self.state.write().await;
        state.users.entry(user_id.to_string()).or_default().default_override = Some(config);
    }

    /// Set (or replace) a per-persona override, creating the user if needed.
    pub async fn set_persona_override(&self, user_id: &str, persona_id: &str, config: ConfigOverride) {
        let mut state = self.state.write().await;
        state
            .users
            .entry(user_id.to_string())
            .or_default()
            .persona_overrides
            .insert(persona_id.to_string(), config);
    }

    pub async fn set_free_default(&self, config: Option<ConfigOverride>) {
        self.state.write().await.free_default = config;
    }

    /// Make every subsequent lookup fail with `error` (or succeed again with `None`).
    pub async fn set_failure(&self, error: Option<StoreError>) {
        self.state.write().await.failure = error;
    }

    /// Number of `find_user` calls served so far.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }

    /// Number of `find_free_default` calls served so far.
    pub fn free_default_lookups(&self) -> usize {
        self.free_default_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn find_user(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }

        Ok(state.users.get(user_id).map(|user| UserRecord {
            user_id: user_id.to_string(),
            persona_override: user.persona_overrides.get(persona_id).cloned(),
            default_override: user.default_override.clone(),
        }))
    }

    async fn find_free_default(&self) -> Result<Option<ConfigOverride>, StoreError> {
        self.free_default_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        Ok(state.free_default.clone())
    }
}
