//! Forge Command Line Interface
//! Issues API calls through the resilient client

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forge_client::{ApiClient, ClientConfig};
use forge_core::logging::{self, LogFormat};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML client configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the API, overrides the config file
    #[arg(long, env = "FORGE_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Bearer token, overrides the config file
    #[arg(long, env = "FORGE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Disable the response cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Log output format (pretty, compact or json)
    #[arg(long, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    /// Print the client metrics snapshot after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a resource
    Get {
        path: String,

        /// Query parameter as key=value, repeatable
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// Create a resource
    Post {
        path: String,

        /// JSON body
        #[arg(short, long)]
        data: String,
    },

    /// Replace a resource
    Put {
        path: String,

        /// JSON body
        #[arg(short, long)]
        data: String,
    },

    /// Update part of a resource
    Patch {
        path: String,

        /// JSON body
        #[arg(short, long)]
        data: String,
    },

    /// Delete a resource
    Delete { path: String },

    /// Repeat a read and report how each call was served
    Probe {
        path: String,

        /// Number of calls
        #[arg(short = 'n', long, default_value_t = 5)]
        count: u32,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// File settings first, then flags and environment on top.
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => {
            let base_url = cli
                .base_url
                .clone()
                .context("no base URL: pass --base-url, set FORGE_BASE_URL or use --config")?;
            ClientConfig::new(base_url)
        }
    };

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(token) = &cli.token {
        config.auth_token = Some(token.clone());
    }
    if cli.no_cache {
        config.enable_caching = false;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, "warn,forge_cli=info")?;

    let config = load_config(&cli)?;
    let client = ApiClient::new(config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling in-flight call");
            on_signal.cancel();
        }
    });

    let outcome = commands::run(&client, cli.command, cancel).await;

    if cli.metrics {
        commands::print_metrics(&client).await?;
    }
    outcome
}
