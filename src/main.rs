#![allow(dead_code)]

mod account;
mod ai;
mod analytics;
mod config;
mod prompts;
mod rpc;
mod tier;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{AppConfig, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_cli(&cli);

    match cli.mode.as_str() {
        "http" => {
            tracing::info!(
                "Starting metaprompt-core HTTP server on {}:{}",
                cli.host,
                cli.port
            );
            rpc::run_http_server(&config, &cli.host, cli.port).await
        }
        "stdio" => {
            tracing::info!("Starting metaprompt-core JSON-RPC server (stdio mode)");
            rpc::run_stdio_server(&config).await
        }
        _ => {
            anyhow::bail!("Invalid mode: {}. Use 'http' or 'stdio'", cli.mode)
        }
    }
}
