//! Monster Chat - chat completions against MonsterAPI's OpenAI-compatible endpoint.

pub mod config;
pub mod llm;
