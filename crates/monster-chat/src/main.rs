use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use monster_chat::config::Config;
use monster_chat::llm::{Chat, Message, StreamEvent, check_http_backend};

/// Send a prompt to MonsterAPI and print the completion.
#[derive(Debug, Parser)]
#[command(name = "monster-chat", version, about)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "monster-chat.yaml")]
    config: PathBuf,

    /// Model to use instead of the configured one
    #[arg(short, long)]
    model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Wait for the full response instead of streaming tokens
    #[arg(long)]
    no_stream: bool,

    /// Prompt to send
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    check_http_backend()?;

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let monster = config.monsterapi;
    let model = cli.model.unwrap_or(monster.model.clone());
    debug!(%model, base_url = %monster.base_url, "Starting chat");

    let chat = Chat::new(model, monster.into_factory());

    let mut messages = Vec::new();
    if let Some(system) = cli.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(cli.prompt));

    let mut stdout = tokio::io::stdout();

    if cli.no_stream {
        let response = chat.ainvoke(messages).await?;
        let content = response.content().unwrap_or_default();
        stdout.write_all(content.as_bytes()).await?;
    } else {
        let mut stream = chat.ainvoke_stream(messages).await?;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token(token) => {
                    stdout.write_all(token.as_bytes()).await?;
                    stdout.flush().await?;
                }
                StreamEvent::Done { usage } => {
                    if let Some(usage) = usage {
                        debug!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "Completion finished"
                        );
                    }
                    break;
                }
            }
        }
    }

    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
