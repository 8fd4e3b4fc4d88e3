//! SQLite store for users and their stored generation configs.
//!
//! Three tables:
//! - `generation_configs` — one row per stored config; `is_free_default`
//!   flags the provider-wide guest default
//! - `users` — a user and the id of their global default config
//! - `user_persona_configs` — per-(user, persona) override links
//!
//! Numeric config columns carry no declared type, so decimal strings
//! survive as TEXT and are handed back as [`StoredNumber::Decimal`].

use async_trait::async_trait;
use parley_core::error::StoreError;
use parley_core::generation::{ConfigOverride, StoredNumber};
use parley_core::store::{ConfigStore, UserRecord};
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info, warn};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

const CONFIG_COLUMNS: &str = "id, name, model, vision_model, temperature, top_p, top_k, \
    frequency_penalty, presence_penalty, repetition_penalty, min_p, top_a, seed, max_tokens, \
    stop, logit_bias, response_format, show_thinking, reasoning_effort, provider_routing, \
    memory_score_threshold, memory_limit, context_window";

/// A SQLite-backed [`ConfigStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `url`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(format!("Invalid SQLite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every connection to `:memory:` is a separate database.
        let ephemeral = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if ephemeral { 1 } else { 4 });
        if ephemeral {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite config store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generation_configs (
                id                      TEXT PRIMARY KEY,
                name                    TEXT,
                model                   TEXT NOT NULL,
                vision_model            TEXT,
                temperature,
                top_p,
                top_k,
                frequency_penalty,
                presence_penalty,
                repetition_penalty,
                min_p,
                top_a,
                seed,
                max_tokens,
                stop                    TEXT,
                logit_bias              TEXT,
                response_format         TEXT,
                show_thinking           INTEGER,
                reasoning_effort        TEXT,
                provider_routing        TEXT,
                memory_score_threshold,
                memory_limit,
                context_window,
                is_free_default         INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("generation_configs table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id                  TEXT PRIMARY KEY,
                default_config_id   TEXT REFERENCES generation_configs(id) ON DELETE SET NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("users table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_persona_configs (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                persona_id  TEXT NOT NULL,
                config_id   TEXT NOT NULL REFERENCES generation_configs(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, persona_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("user_persona_configs table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generation_configs_free ON generation_configs(is_free_default)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("free default index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert a stored config, or update it in place so existing links survive.
    ///
    /// Flagging a config as the free default clears the flag on every other row.
    pub async fn upsert_config(
        &self,
        id: &str,
        config: &ConfigOverride,
        is_free_default: bool,
    ) -> Result<(), StoreError> {
        if is_free_default {
            sqlx::query("UPDATE generation_configs SET is_free_default = 0 WHERE id != ?1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("clear free default: {e}")))?;
        }

        let query = sqlx::query(
            r#"
            INSERT INTO generation_configs (
                id, name, model, vision_model, temperature, top_p, top_k,
                frequency_penalty, presence_penalty, repetition_penalty, min_p, top_a, seed,
                max_tokens, stop, logit_bias, response_format, show_thinking, reasoning_effort,
                provider_routing, memory_score_threshold, memory_limit, context_window,
                is_free_default
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
            )
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                model = excluded.model,
                vision_model = excluded.vision_model,
                temperature = excluded.temperature,
                top_p = excluded.top_p,
                top_k = excluded.top_k,
                frequency_penalty = excluded.frequency_penalty,
                presence_penalty = excluded.presence_penalty,
                repetition_penalty = excluded.repetition_penalty,
                min_p = excluded.min_p,
                top_a = excluded.top_a,
                seed = excluded.seed,
                max_tokens = excluded.max_tokens,
                stop = excluded.stop,
                logit_bias = excluded.logit_bias,
                response_format = excluded.response_format,
                show_thinking = excluded.show_thinking,
                reasoning_effort = excluded.reasoning_effort,
                provider_routing = excluded.provider_routing,
                memory_score_threshold = excluded.memory_score_threshold,
                memory_limit = excluded.memory_limit,
                context_window = excluded.context_window,
                is_free_default = excluded.is_free_default
            "#,
        )
        .bind(id)
        .bind(config.name.clone())
        .bind(config.model.clone())
        .bind(config.vision_model.clone());

        let query = [
            &config.temperature,
            &config.top_p,
            &config.top_k,
            &config.frequency_penalty,
            &config.presence_penalty,
            &config.repetition_penalty,
            &config.min_p,
            &config.top_a,
            &config.seed,
            &config.max_tokens,
        ]
        .into_iter()
        .fold(query, bind_number);

        let query = query
            .bind(to_json(&config.stop))
            .bind(to_json(&config.logit_bias))
            .bind(to_json(&config.response_format))
            .bind(config.show_thinking)
            .bind(config.reasoning_effort.clone())
            .bind(to_json(&config.provider_routing));

        let query = [
            &config.memory_score_threshold,
            &config.memory_limit,
            &config.context_window,
        ]
        .into_iter()
        .fold(query, bind_number);

        query
            .bind(is_free_default)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("upsert config {id}: {e}")))?;

        debug!("Stored generation config {id}");
        Ok(())
    }

    /// Insert or update a user and their global default.
    pub async fn upsert_user(
        &self,
        user_id: &str,
        default_config_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, default_config_id) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET default_config_id = excluded.default_config_id
            "#,
        )
        .bind(user_id)
        .bind(default_config_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("upsert user {user_id}: {e}")))?;
        Ok(())
    }

    /// Link a stored config as the user's override for one persona.
    pub async fn link_persona_config(
        &self,
        user_id: &str,
        persona_id: &str,
        config_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_persona_configs (user_id, persona_id, config_id) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, persona_id) DO UPDATE SET config_id = excluded.config_id
            "#,
        )
        .bind(user_id)
        .bind(persona_id)
        .bind(config_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::QueryFailed(format!("link {user_id}/{persona_id} -> {config_id}: {e}"))
        })?;
        Ok(())
    }

    async fn load_config(&self, config_id: &str) -> Result<Option<ConfigOverride>, StoreError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM generation_configs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(config_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("load config {config_id}: {e}")))?;
        row.as_ref().map(row_to_override).transpose()
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find_user(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let Some(user_row) = sqlx::query("SELECT id, default_config_id FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("find user {user_id}: {e}")))?
        else {
            return Ok(None);
        };

        let default_config_id: Option<String> = user_row
            .try_get("default_config_id")
            .map_err(|e| StoreError::QueryFailed(format!("default_config_id column: {e}")))?;

        let persona_config_id: Option<String> = sqlx::query(
            "SELECT config_id FROM user_persona_configs WHERE user_id = ?1 AND persona_id = ?2",
        )
        .bind(user_id)
        .bind(persona_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("find persona link: {e}")))?
        .map(|row| row.try_get("config_id"))
        .transpose()
        .map_err(|e| StoreError::QueryFailed(format!("config_id column: {e}")))?;

        let persona_override = match persona_config_id {
            Some(id) => self.load_config(&id).await?,
            None => None,
        };
        let default_override = match default_config_id {
            Some(id) => self.load_config(&id).await?,
            None => None,
        };

        Ok(Some(UserRecord {
            user_id: user_id.to_string(),
            persona_override,
            default_override,
        }))
    }

    async fn find_free_default(&self) -> Result<Option<ConfigOverride>, StoreError> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM generation_configs WHERE is_free_default = 1 ORDER BY rowid LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("find free default: {e}")))?;
        row.as_ref().map(row_to_override).transpose()
    }
}

fn bind_number<'q>(query: SqliteQuery<'q>, value: &Option<StoredNumber>) -> SqliteQuery<'q> {
    match value {
        Some(StoredNumber::Integer(v)) => query.bind(*v),
        Some(StoredNumber::Float(v)) => query.bind(*v),
        Some(StoredNumber::Decimal(v)) => query.bind(v.clone()),
        None => query.bind(None::<f64>),
    }
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Option<String> {
    value.as_ref().and_then(|v| serde_json::to_string(v).ok())
}

fn text_column(row: &SqliteRow, column: &str) -> Result<Option<String>, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

/// Read an untyped numeric column according to its runtime storage class.
fn number_column(row: &SqliteRow, column: &str) -> Result<Option<StoredNumber>, StoreError> {
    let raw = row
        .try_get_raw(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))?;
    if raw.is_null() {
        return Ok(None);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();

    let value = match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(column).map(StoredNumber::Integer),
        "REAL" => row.try_get::<f64, _>(column).map(StoredNumber::Float),
        _ => row.try_get::<String, _>(column).map(StoredNumber::Decimal),
    };
    value
        .map(Some)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

/// Parse a JSON text column. Malformed JSON is logged and treated as absent.
fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<T>, StoreError> {
    let Some(text) = text_column(row, column)? else {
        return Ok(None);
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(column, error = %e, "Ignoring malformed JSON column");
            Ok(None)
        }
    }
}

fn row_to_override(row: &SqliteRow) -> Result<ConfigOverride, StoreError> {
    let model: String = row
        .try_get("model")
        .map_err(|e| StoreError::QueryFailed(format!("model column: {e}")))?;
    let show_thinking: Option<bool> = row
        .try_get("show_thinking")
        .map_err(|e| StoreError::QueryFailed(format!("show_thinking column: {e}")))?;

    Ok(ConfigOverride {
        name: text_column(row, "name")?,
        model,
        vision_model: text_column(row, "vision_model")?,
        temperature: number_column(row, "temperature")?,
        top_p: number_column(row, "top_p")?,
        top_k: number_column(row, "top_k")?,
        frequency_penalty: number_column(row, "frequency_penalty")?,
        presence_penalty: number_column(row, "presence_penalty")?,
        repetition_penalty: number_column(row, "repetition_penalty")?,
        min_p: number_column(row, "min_p")?,
        top_a: number_column(row, "top_a")?,
        seed: number_column(row, "seed")?,
        max_tokens: number_column(row, "max_tokens")?,
        stop: json_column(row, "stop")?,
        logit_bias: json_column(row, "logit_bias")?,
        response_format: json_column(row, "response_format")?,
        show_thinking,
        reasoning_effort: text_column(row, "reasoning_effort")?,
        provider_routing: json_column(row, "provider_routing")?,
        memory_score_threshold: number_column(row, "memory_score_threshold")?,
        memory_limit: number_column(row, "memory_limit")?,
        context_window: number_column(row, "context_window")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn sample_override(model: &str) -> ConfigOverride {
        ConfigOverride {
            name: Some(format!("{model} preset")),
            temperature: Some(StoredNumber::Decimal("0.85".into())),
            top_k: Some(StoredNumber::Integer(40)),
            top_p: Some(StoredNumber::Float(0.9)),
            stop: Some(vec!["</reply>".into()]),
            show_thinking: Some(true),
            provider_routing: Some(serde_json::json!({"order": ["deepinfra"]})),
            ..ConfigOverride::for_model(model)
        }
    }

    #[tokio::test]
    async fn updating_a_linked_config_keeps_its_links() {
        let store = test_store().await;
        store
            .upsert_config("cfg-d", &ConfigOverride::for_model("m3"), false)
            .await
            .unwrap();
        store
            .upsert_config("cfg-l", &ConfigOverride::for_model("m2"), false)
            .await
            .unwrap();
        store.upsert_user("u1", Some("cfg-d")).await.unwrap();
        store.link_persona_config("u1", "luna", "cfg-l").await.unwrap();

        store
            .upsert_config("cfg-d", &ConfigOverride::for_model("m3b"), false)
            .await
            .unwrap();
        store
            .upsert_config("cfg-l", &sample_override("m2b"), false)
            .await
            .unwrap();

        let record = store.find_user("u1", "luna").await.unwrap().unwrap();
        let luna = record.persona_override.unwrap();
        assert_eq!(luna.model, "m2b");
        assert_eq!(luna.top_k, Some(StoredNumber::Integer(40)));
        assert_eq!(record.default_override.unwrap().model, "m3b");
    }

    #[tokio::test]
    async fn missing_user_is_none() {
        let store = test_store().await;
        assert!(store.find_user("ghost", "luna").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_without_overrides() {
        let store = test_store().await;
        store.upsert_user("u1", None).await.unwrap();
        let record = store.find_user("u1", "luna").await.unwrap().unwrap();
        assert_eq!(record.user_id, "u1");
        assert!(record.persona_override.is_none());
        assert!(record.default_override.is_none());
    }

    #[tokio::test]
    async fn overrides_roundtrip_with_storage_classes() {
        let store = test_store().await;
        store
            .upsert_config("cfg-default", &ConfigOverride::for_model("m3"), false)
            .await
            .unwrap();
        store
            .upsert_config("cfg-luna", &sample_override("m2"), false)
            .await
            .unwrap();
        store.upsert_user("u1", Some("cfg-default")).await.unwrap();
        store
            .link_persona_config("u1", "luna", "cfg-luna")
            .await
            .unwrap();

        let record = store.find_user("u1", "luna").await.unwrap().unwrap();
        let luna = record.persona_override.unwrap();
        assert_eq!(luna.model, "m2");
        assert_eq!(luna.name.as_deref(), Some("m2 preset"));
        assert_eq!(luna.temperature, Some(StoredNumber::Decimal("0.85".into())));
        assert_eq!(luna.top_k, Some(StoredNumber::Integer(40)));
        assert_eq!(luna.top_p, Some(StoredNumber::Float(0.9)));
        assert_eq!(luna.stop, Some(vec!["</reply>".to_string()]));
        assert_eq!(luna.show_thinking, Some(true));
        assert_eq!(
            luna.provider_routing,
            Some(serde_json::json!({"order": ["deepinfra"]}))
        );
        assert!(luna.max_tokens.is_none());
        assert_eq!(record.default_override.unwrap().model, "m3");

        let other = store.find_user("u1", "sol").await.unwrap().unwrap();
        assert!(other.persona_override.is_none());
    }

    #[tokio::test]
    async fn free_default_is_unique() {
        let store = test_store().await;
        assert!(store.find_free_default().await.unwrap().is_none());

        store
            .upsert_config("free-a", &ConfigOverride::for_model("free/a"), true)
            .await
            .unwrap();
        store
            .upsert_config("free-b", &ConfigOverride::for_model("free/b"), true)
            .await
            .unwrap();

        let free = store.find_free_default().await.unwrap().unwrap();
        assert_eq!(free.model, "free/b");
    }

    #[tokio::test]
    async fn malformed_json_column_is_ignored() {
        let store = test_store().await;
        store
            .upsert_config("cfg", &ConfigOverride::for_model("m"), false)
            .await
            .unwrap();
        sqlx::query("UPDATE generation_configs SET stop = 'not json' WHERE id = 'cfg'")
            .execute(&store.pool)
            .await
            .unwrap();
        let cfg = store.load_config("cfg").await.unwrap().unwrap();
        assert!(cfg.stop.is_none());
    }
}
