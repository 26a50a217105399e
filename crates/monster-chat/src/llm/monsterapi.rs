//! MonsterAPI client factory.
//!
//! MonsterAPI speaks the OpenAI chat completions protocol, so the factory only
//! points the OpenAI-compatible client at MonsterAPI's endpoint with the right
//! credentials. Request handling lives in [`OpenAIClient`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use super::error::LLMError;
use super::openai::{BlockingOpenAIClient, OpenAIClient};
use super::params::ClientParams;
use super::transport::{AsyncTransport, PoolLimits};

/// Builds the client handles a [`Chat`](super::Chat) issues requests through.
pub trait ClientFactory: Send + Sync {
    /// Obtain a blocking client handle.
    fn sync_client(&self) -> Result<Arc<BlockingOpenAIClient>, LLMError>;

    /// Obtain an async client handle.
    fn async_client(&self) -> Result<Arc<OpenAIClient>, LLMError>;
}

/// Client configuration for MonsterAPI.
#[derive(Debug, Clone)]
pub struct MonsterApi {
    /// Explicit API key. Falls back to `MONSTER_API_KEY` when unset.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub default_headers: Option<BTreeMap<String, String>>,
    pub default_query: Option<BTreeMap<String, String>>,
    /// Blocking HTTP client used as is for sync handles.
    pub http_client: Option<reqwest::blocking::Client>,
    /// Transport used as is for async handles.
    pub http_async_client: Option<AsyncTransport>,
    /// Applied last; wins over every field above.
    pub extra_client_params: Map<String, Value>,
    /// Pre-built sync handle, returned without constructing a new one.
    pub client: Option<Arc<BlockingOpenAIClient>>,
    /// Pre-built async handle, returned without constructing a new one.
    pub async_client: Option<Arc<OpenAIClient>>,
}

impl Default for MonsterApi {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout: None,
            max_retries: None,
            default_headers: None,
            default_query: None,
            http_client: None,
            http_async_client: None,
            extra_client_params: Map::new(),
            client: None,
            async_client: None,
        }
    }
}

impl MonsterApi {
    pub const DEFAULT_BASE_URL: &'static str = "https://llm.monsterapi.ai/v1/";
    pub const API_KEY_ENV: &'static str = "MONSTER_API_KEY";
    pub const DEFAULT_MODEL: &'static str = "meta-llama/Meta-Llama-3-8B-Instruct";

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Resolve the parameter set, reading `MONSTER_API_KEY` from the process environment.
    pub fn client_params(&self) -> Result<ClientParams, LLMError> {
        self.client_params_with_env(|key| std::env::var(key).ok())
    }

    /// Resolve the parameter set with `env` standing in for the process environment.
    ///
    /// Order: explicit field, then environment, then the client's own default.
    /// An empty key counts as unset at both steps. `extra_client_params` is applied last.
    pub fn client_params_with_env<F>(&self, env: F) -> Result<ClientParams, LLMError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let api_key = match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Some(key.to_string()),
            None => env(Self::API_KEY_ENV).filter(|k| !k.is_empty()),
        };

        let mut params = ClientParams {
            api_key,
            organization: None,
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
            default_headers: self.default_headers.clone(),
            default_query: self.default_query.clone(),
        };
        params.apply_extra(&self.extra_client_params)?;
        Ok(params)
    }

    pub(crate) fn build_sync_client(
        &self,
        params: ClientParams,
    ) -> Result<BlockingOpenAIClient, LLMError> {
        let http = match self.http_client {
            Some(ref http) => http.clone(),
            None => reqwest::blocking::Client::builder().build()?,
        };
        BlockingOpenAIClient::new(params, http)
    }

    pub(crate) fn build_async_client(
        &self,
        params: ClientParams,
    ) -> Result<OpenAIClient, LLMError> {
        let transport = match self.http_async_client {
            Some(ref transport) => transport.clone(),
            None => AsyncTransport::pooled(PoolLimits::DEFAULT)?,
        };
        OpenAIClient::new(params, transport)
    }
}

impl ClientFactory for MonsterApi {
    fn sync_client(&self) -> Result<Arc<BlockingOpenAIClient>, LLMError> {
        if let Some(ref client) = self.client {
            return Ok(Arc::clone(client));
        }
        let params = self.client_params()?;
        debug!(base_url = %params.base_url, has_api_key = params.api_key.is_some(), "Building MonsterAPI sync client");
        Ok(Arc::new(self.build_sync_client(params)?))
    }

    fn async_client(&self) -> Result<Arc<OpenAIClient>, LLMError> {
        if let Some(ref client) = self.async_client {
            return Ok(Arc::clone(client));
        }
        let params = self.client_params()?;
        debug!(base_url = %params.base_url, has_api_key = params.api_key.is_some(), "Building MonsterAPI async client");
        Ok(Arc::new(self.build_async_client(params)?))
    }
}
