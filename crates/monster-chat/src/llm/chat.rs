//! Chat component that issues completions through a pluggable client factory.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::error::LLMError;
use super::monsterapi::{ClientFactory, MonsterApi};
use super::openai::{BlockingOpenAIClient, OpenAIClient};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, ChatStream, Message};

/// A chat model bound to a client factory.
///
/// Client handles are built on first use and reused for the lifetime of the `Chat`.
/// Use the blocking methods only outside an async runtime.
pub struct Chat<F> {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    factory: F,
    client: OnceLock<Arc<BlockingOpenAIClient>>,
    async_client: OnceLock<Arc<OpenAIClient>>,
}

impl Chat<MonsterApi> {
    /// Chat against MonsterAPI with its default model.
    pub fn monster_api(factory: MonsterApi) -> Self {
        Self::new(MonsterApi::DEFAULT_MODEL, factory)
    }
}

impl<F: ClientFactory> Chat<F> {
    pub fn new(model: impl Into<String>, factory: F) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            factory,
            client: OnceLock::new(),
            async_client: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Blocking client handle, built on first call.
    pub fn client(&self) -> Result<Arc<BlockingOpenAIClient>, LLMError> {
        if let Some(client) = self.client.get() {
            return Ok(Arc::clone(client));
        }
        let client = self.factory.sync_client()?;
        // A concurrent caller may have won the race; keep whichever landed first.
        Ok(Arc::clone(self.client.get_or_init(|| client)))
    }

    /// Async client handle, built on first call.
    pub fn async_client(&self) -> Result<Arc<OpenAIClient>, LLMError> {
        if let Some(client) = self.async_client.get() {
            return Ok(Arc::clone(client));
        }
        let client = self.factory.async_client()?;
        Ok(Arc::clone(self.async_client.get_or_init(|| client)))
    }

    pub fn request(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn invoke(&self, messages: Vec<Message>) -> Result<ChatResponse, LLMError> {
        self.client()?.chat(&self.request(messages))
    }

    pub async fn ainvoke(&self, messages: Vec<Message>) -> Result<ChatResponse, LLMError> {
        self.async_client()?.chat(&self.request(messages)).await
    }

    pub async fn ainvoke_stream(&self, messages: Vec<Message>) -> Result<ChatStream, LLMError> {
        self.async_client()?
            .chat_stream(&self.request(messages))
            .await
    }
}

#[async_trait]
impl<F: ClientFactory> LLMProvider for Chat<F> {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        self.async_client()?.chat(&request).await
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.async_client()?.chat_stream(&request).await
    }
}
