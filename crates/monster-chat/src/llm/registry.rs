//! Provider registry for managing LLM provider instances.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::chat::Chat;
use super::monsterapi::MonsterApi;
use super::provider::{LLMProvider, Provider};

/// Registry of LLM providers, keyed by provider type.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize providers from environment variables.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    fn from_env_with<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new();

        if let Some(api_key) = env(MonsterApi::API_KEY_ENV) {
            let chat = Chat::monster_api(MonsterApi::new().with_api_key(api_key));
            registry.register(Provider::MonsterApi, Arc::new(chat));
            info!("Registered MonsterAPI provider");
        } else {
            warn!(
                "No LLM providers configured. Set {}.",
                MonsterApi::API_KEY_ENV
            );
        }

        registry
    }

    /// Register a provider implementation.
    pub fn register(&mut self, provider: Provider, implementation: Arc<dyn LLMProvider>) {
        self.providers.insert(provider, implementation);
    }

    /// Get a provider by type.
    pub fn get(&self, provider: &Provider) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(provider).cloned()
    }
}
