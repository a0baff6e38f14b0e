// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! grokline: command-line driver for the Grok web chat client.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::StreamExt;

use grokline::config::{resolve_base_url, DEFAULT_MODEL};
use grokline::headers::HeaderTemplates;
use grokline::{Client, ClientConfig, ContinuationToken, ModelSpec, StreamFrame};

#[derive(Parser)]
#[command(
    name = "grokline",
    about = "Talk to the Grok web chat from the terminal",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply.
    Chat {
        /// Message text.
        message: String,

        /// Model name (see `grokline models`).
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Proxy URL for every request.
        /// Also reads from GROKLINE_PROXY.
        #[arg(long)]
        proxy: Option<String>,

        /// Service origin override.
        #[arg(long)]
        base_url: Option<String>,

        /// Script intelligence cache directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Continue the conversation stored in this file.
        #[arg(short, long)]
        continuation: Option<PathBuf>,

        /// Write the continuation token for the next turn to this file.
        #[arg(short, long)]
        save: Option<PathBuf>,

        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,

        /// Print the full result as JSON instead of plain text.
        #[arg(long, conflicts_with = "stream")]
        json: bool,
    },

    /// List models with a dedicated request mode.
    Models,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   grokline completions bash > ~/.local/share/bash-completion/completions/grokline
    ///   grokline completions zsh > ~/.zfunc/_grokline
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            model,
            proxy,
            base_url,
            cache_dir,
            continuation,
            save,
            stream,
            json,
        } => {
            let mut config = ClientConfig::resolve(&model, proxy.as_deref());
            if let Some(raw) = base_url.as_deref() {
                config.base_url = resolve_base_url(Some(raw));
                config.headers = HeaderTemplates::chrome(&config.base_url);
            }
            if cache_dir.is_some() {
                config = config.with_cache_dir(cache_dir);
            }

            let token = continuation.as_deref().map(load_token).transpose()?;
            let mut client = Client::from_config(config)?;

            let next = if stream {
                stream_turn(&mut client, &message, token.as_ref()).await?
            } else {
                let result = client.send_message(&message, token.as_ref()).await?;
                if json {
                    let out = serde_json::json!({
                        "response": result.response,
                        "stream_response": result.stream_response,
                        "images": result.images,
                        "continuation": result.continuation,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    println!("{}", result.response);
                    for image in result.images.iter().flatten() {
                        println!("[image] {image}");
                    }
                }
                result.continuation
            };

            if let Some(path) = save {
                std::fs::write(&path, next.to_json())
                    .with_context(|| format!("cannot write {}", path.display()))?;
                tracing::info!("continuation saved to {}", path.display());
            }
        }

        Commands::Models => {
            for name in ModelSpec::known_names() {
                let spec = ModelSpec::resolve(name);
                println!("{name:<28} {}", spec.mode);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "grokline", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn load_token(path: &Path) -> anyhow::Result<ContinuationToken> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(ContinuationToken::from_json(&raw)?)
}

async fn stream_turn(
    client: &mut Client,
    message: &str,
    token: Option<&ContinuationToken>,
) -> anyhow::Result<ContinuationToken> {
    let frames = client.stream_message(message, token);
    futures::pin_mut!(frames);

    let mut stdout = std::io::stdout();
    while let Some(frame) = frames.next().await {
        match frame {
            StreamFrame::Token(token) => {
                write!(stdout, "{token}")?;
                stdout.flush()?;
            }
            StreamFrame::Terminal { continuation, .. } => {
                writeln!(stdout)?;
                return Ok(continuation);
            }
            StreamFrame::Error(e) => {
                writeln!(stdout)?;
                return Err(e.into());
            }
        }
    }
    anyhow::bail!("reply ended without a terminal frame")
}
