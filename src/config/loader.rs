//! Load the runtime config from a JSON file or string, with environment overrides.

use crate::config::{validate, RuntimeConfig};
use crate::error::ConfigError;
use std::path::Path;

/// Env var naming the config file. Default `gateway.json`.
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Config file path from `GATEWAY_CONFIG`, default `gateway.json`.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "gateway.json".into())
}

/// Parse and validate config text. Applies `GATEWAY_REST_PATH` and `GATEWAY_DB_SCHEMA` overrides.
pub fn load_from_str(text: &str) -> Result<RuntimeConfig, ConfigError> {
    let mut config: RuntimeConfig =
        serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

pub async fn load_from_path(path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config = load_from_str(&text)?;
    tracing::info!(path = %path.display(), entities = config.entities.len(), "runtime config loaded");
    Ok(config)
}

fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(p) = std::env::var("GATEWAY_REST_PATH") {
        if !p.trim().is_empty() {
            config.rest.path = p;
        }
    }
    if let Ok(s) = std::env::var("GATEWAY_DB_SCHEMA") {
        if !s.trim().is_empty() {
            config.database.schema = s;
        }
    }
}
