//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use parley_core::generation::GenerationConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persona id used when a requested persona is not configured.
pub const DEFAULT_PERSONA: &str = "default";

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion provider connection
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Relational store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Resolution cache behaviour
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry, deadline, and stop-sequence policy
    #[serde(default)]
    pub invocation: InvocationConfig,

    /// Built-in persona defaults, keyed by persona id
    #[serde(default = "default_personas")]
    pub personas: BTreeMap<String, GenerationConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_provider_name() -> String {
    "openrouter".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        AppConfig::config_dir().join("parley.db").display()
    )
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached resolution
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the background sweep evicts expired entries
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_true")]
    pub sweep_enabled: bool,
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    600
}
fn default_true() -> bool {
    true
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Wall-clock budget for the whole invocation across retries
    #[serde(default = "default_global_deadline_secs")]
    pub global_deadline_secs: u64,

    /// Upper bound for a single provider call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Model-name patterns that do not honor stop sequences.
    /// `None` uses the built-in list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_unsupported_models: Option<Vec<String>>,

    /// Marker a complete reply is expected to end with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminator: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_global_deadline_secs() -> u64 {
    120
}
fn default_call_timeout_secs() -> u64 {
    60
}

impl InvocationConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_secs(self.global_deadline_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            global_deadline_secs: default_global_deadline_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            stop_unsupported_models: None,
            terminator: None,
        }
    }
}

fn default_personas() -> BTreeMap<String, GenerationConfig> {
    let mut persona = GenerationConfig::new("anthropic/claude-sonnet-4", 32_000);
    persona.temperature = Some(0.7);
    persona.max_tokens = Some(1024);
    persona.memory_limit = Some(5);
    persona.memory_score_threshold = Some(0.75);

    let mut personas = BTreeMap::new();
    personas.insert(DEFAULT_PERSONA.to_string(), persona);
    personas
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment variables override file values; see [`AppConfig::apply_env`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load `path`, then apply process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// API keys are checked in order `PARLEY_API_KEY`, `OPENROUTER_API_KEY`,
    /// `OPENAI_API_KEY` and only fill a key the file left empty.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("PARLEY_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("PARLEY_DATABASE_URL") {
            self.store.database_url = url;
        }

        if let Some(v) = lookup("PARLEY_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("PARLEY_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_CACHE_SWEEP_INTERVAL_SECS") {
            self.cache.sweep_interval_secs = parse_env("PARLEY_CACHE_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_CACHE_SWEEP_ENABLED") {
            self.cache.sweep_enabled = parse_env("PARLEY_CACHE_SWEEP_ENABLED", &v)?;
        }
        if let Some(v) = lookup("PARLEY_MAX_ATTEMPTS") {
            self.invocation.max_attempts = parse_env("PARLEY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_RETRY_BASE_DELAY_MS") {
            self.invocation.base_delay_ms = parse_env("PARLEY_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_INVOKE_DEADLINE_SECS") {
            self.invocation.global_deadline_secs = parse_env("PARLEY_INVOKE_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("PARLEY_CALL_TIMEOUT_SECS") {
            self.invocation.call_timeout_secs = parse_env("PARLEY_CALL_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Persona defaults for `persona_id`, falling back to the default persona.
    pub fn persona(&self, persona_id: &str) -> GenerationConfig {
        self.personas
            .get(persona_id)
            .or_else(|| self.personas.get(DEFAULT_PERSONA))
            .cloned()
            .unwrap_or_else(|| {
                tracing::warn!(persona_id, "No persona configured; using built-in defaults");
                default_personas()
                    .remove(DEFAULT_PERSONA)
                    .unwrap_or_else(|| GenerationConfig::new("anthropic/claude-sonnet-4", 32_000))
            })
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.invocation.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "invocation.max_attempts must be at least 1".into(),
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.ttl_secs must be > 0".into(),
            ));
        }

        if self.cache.sweep_enabled && self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.sweep_interval_secs must be > 0 when the sweep is enabled".into(),
            ));
        }

        for (id, persona) in &self.personas {
            if let Some(t) = persona.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "personas.{id}.temperature must be between 0.0 and 2.0"
                    )));
                }
            }
            if persona.context_window == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "personas.{id}.context_window must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// Render the config as TOML with the API key removed.
    pub fn redacted_toml(&self) -> String {
        let mut copy = self.clone();
        if copy.provider.api_key.is_some() {
            copy.provider.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&copy).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            invocation: InvocationConfig::default(),
            personas: default_personas(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: cannot parse '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
