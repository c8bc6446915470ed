use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Selects, for one collaborator feature, which provider implementation to
/// build and the free-form options it needs (endpoint, model name, api key
/// env var, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

impl ProviderConfig {
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.config.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.config.get(key).and_then(|v| v.as_u64()).map(|n| n as usize)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8091 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    pub max_iter: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { max_iter: 3 }
    }
}

/// Process-wide configuration: the HTTP bind address, the default iteration
/// cap, and a per-feature provider table. Mirrors the reference system's
/// YAML `provide_settings` one-provider-per-feature shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub query_settings: QuerySettings,
    pub providers: HashMap<String, ProviderConfig>,
}

pub const FEATURE_LLM: &str = "llm";
pub const FEATURE_EMBEDDING: &str = "embedding";
pub const FEATURE_VECTOR_DB: &str = "vector_db";
pub const FEATURE_FILE_LOADER: &str = "file_loader";
pub const FEATURE_WEB_CRAWLER: &str = "web_crawler";

impl Config {
    /// Loads configuration by layering, lowest precedence first: built-in
    /// defaults, an optional `config/default.toml`, `.env`, then environment
    /// variables prefixed `DEEPSEARCHER_` (e.g. `DEEPSEARCHER_SERVER.PORT`).
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8091)?
            .set_default("query_settings.max_iter", 3)?
            .set_default("providers.llm.provider", "ollama")?
            .set_default("providers.llm.config.endpoint", "http://localhost:11434")?
            .set_default("providers.llm.config.model", "llama3.2")?
            .set_default("providers.embedding.provider", "http")?
            .set_default("providers.embedding.config.endpoint", "http://localhost:8001")?
            .set_default("providers.embedding.config.model", "e5-base-v2")?
            .set_default("providers.embedding.config.dimension", 768)?
            .set_default("providers.vector_db.provider", "postgres")?
            .set_default("providers.vector_db.config.endpoint", "postgresql://localhost/deepsearcher")?
            .set_default("providers.vector_db.config.default_collection", "default")?;

        if std::path::Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::with_name(&config_path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("DEEPSEARCHER").separator("__"))
            .build()
            .context("failed to build configuration")?;

        config.try_deserialize().context("failed to deserialize configuration")
    }

    pub fn provider(&self, feature: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(feature)
            .with_context(|| format!("no provider configured for feature '{feature}'"))
    }

    /// Swaps a collaborator's provider at runtime, the effect of
    /// `POST /set-provider-config`. Callers must rebuild any agent registry
    /// that cached the old collaborator.
    pub fn set_provider_config(&mut self, feature: impl Into<String>, provider: impl Into<String>, options: Value) {
        self.providers.insert(feature.into(), ProviderConfig { provider: provider.into(), config: options });
    }
}
