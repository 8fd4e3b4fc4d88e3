//! Relational store collaborator.
//!
//! The resolver only reads a fixed projection: a user's optional per-persona
//! override, the user's optional global default, and the provider-wide free
//! default. Implementations live in `parley-store`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::generation::ConfigOverride;

/// The projection of a user record the resolver needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,

    /// Override linked to this (user, persona) pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_override: Option<ConfigOverride>,

    /// The user's global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_override: Option<ConfigOverride>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            persona_override: None,
            default_override: None,
        }
    }
}

/// Read access to stored generation configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The store name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Look up a user and the overrides that apply to `persona_id`.
    ///
    /// `Ok(None)` means the user does not exist.
    async fn find_user(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> std::result::Result<Option<UserRecord>, StoreError>;

    /// Look up the single record flagged as the free default.
    async fn find_free_default(&self) -> std::result::Result<Option<ConfigOverride>, StoreError>;
}
