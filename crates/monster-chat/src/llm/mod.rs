//! LLM client for chat completions.

mod chat;
mod error;
mod monsterapi;
mod openai;
mod params;
mod provider;
mod registry;
mod transport;
mod types;

pub use chat::Chat;
pub use error::{LLMError, check_response_error};
pub use monsterapi::{ClientFactory, MonsterApi};
pub use openai::{BlockingOpenAIClient, OpenAIClient};
pub use params::ClientParams;
pub use provider::{LLMProvider, Provider};
pub use registry::ProviderRegistry;
pub use transport::{AsyncTransport, PoolLimits, check_http_backend};
pub use types::{ChatRequest, ChatResponse, ChatStream, Choice, Message, Role, StreamEvent, Usage};
