//! LLM provider trait and provider identifiers.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse, ChatStream};

/// Trait for anything that can serve chat completions.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Make a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Make a streaming chat completion request.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;
}

/// Known providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    MonsterApi,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::MonsterApi => write!(f, "monsterapi"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monsterapi" | "monster" => Ok(Provider::MonsterApi),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}
