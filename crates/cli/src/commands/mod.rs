pub mod budget;
pub mod config_cmd;
pub mod resolve;
pub mod turn;

use parley_config::AppConfig;
use parley_core::message::HistoryEntry;
use parley_core::store::ConfigStore;
use parley_resolver::{CacheOptions, ConfigResolver};
use parley_store::{InMemoryStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Build a resolver over the configured SQLite store, or an empty
/// in-memory one when `ephemeral` is set.
pub async fn open_resolver(config: &AppConfig, ephemeral: bool) -> CliResult<Arc<ConfigResolver>> {
    let store: Arc<dyn ConfigStore> = if ephemeral {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::new(&config.store.database_url)
                .await
                .map_err(|e| format!("Failed to open store: {e}"))?,
        )
    };
    Ok(Arc::new(ConfigResolver::new(
        store,
        CacheOptions::from_config(&config.cache),
    )))
}

pub fn read_system_prompt(path: Option<&PathBuf>) -> CliResult<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| format!("Failed to read {}: {e}", path.display()).into()),
        None => Ok(String::new()),
    }
}

pub fn read_history(path: Option<&PathBuf>) -> CliResult<Vec<HistoryEntry>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}
