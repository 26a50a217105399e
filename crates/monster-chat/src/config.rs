use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::MonsterApi;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monsterapi: MonsterApiConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// MonsterApiConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MonsterApiConfig {
    /// Falls back to `MONSTER_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub default_headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub default_query: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub extra_client_params: Map<String, Value>,
}

impl Default for MonsterApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            timeout_seconds: None,
            max_retries: None,
            default_headers: None,
            default_query: None,
            extra_client_params: Map::new(),
        }
    }
}

impl MonsterApiConfig {
    pub fn into_factory(self) -> MonsterApi {
        MonsterApi {
            api_key: self.api_key,
            base_url: self.base_url,
            timeout: self.timeout_seconds.map(Duration::from_secs),
            max_retries: self.max_retries,
            default_headers: self.default_headers,
            default_query: self.default_query,
            extra_client_params: self.extra_client_params,
            ..MonsterApi::default()
        }
    }
}

fn default_base_url() -> String {
    MonsterApi::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    MonsterApi::DEFAULT_MODEL.to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
