//! wispd - Wisp node daemon
//!
//! Generates a fresh node key pair, binds a UDP endpoint, optionally
//! contacts the bootstrap address and runs the line console.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wisp_core::KeyPair;
use wisp_net::start_node;
use wispd::config::{Config, LogFormat};
use wispd::console;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    init_logging(&config);

    info!(
        "wispd v{} - Wisp encrypted peer node",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(config).await {
        error!("Fatal: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(config: &Config) {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wispd={level},wisp_net={level}")));

    // Logs go to stderr so they do not interleave with console output
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let keys = KeyPair::generate().context("cannot generate node key pair")?;
    let (handle, events) = start_node(config.node_config(), keys)
        .await
        .context("cannot start transport")?;

    tokio::select! {
        result = console::run(handle.clone(), events) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    info!("Shutting down...");
    handle.shutdown().await;
    Ok(())
}
