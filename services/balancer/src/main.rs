//! rr-balancer
//!
//! Round-robin L4 TCP relay.
//!
//! This service:
//! - Accepts TCP connections on one listen address
//! - Picks a backend from a fixed pool in strict round-robin order
//! - Relays bytes both ways until either side closes

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use rr_balancer::{BackendSelector, Cli, Config, Listener, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_cli(Cli::parse()).context("invalid configuration")?;

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(fmt_layer)
        .init();

    info!("Starting rr-balancer");
    let backends: Vec<String> = config.backends.iter().map(ToString::to_string).collect();
    info!(
        listen = %config.listen,
        backends = ?backends,
        connect_timeout_ms = config.connect_timeout_ms(),
        idle_timeout_ms = config.idle_timeout_ms(),
        "Configuration loaded"
    );

    let selector = Arc::new(BackendSelector::new(config.backends.clone()));

    let listener = match Listener::bind(config.listener_config(), selector).await {
        Ok(listener) => Arc::new(listener),
        Err(e) => {
            error!(bind_addr = %config.listen, error = %e, "Failed to bind listener");
            return Err(e).with_context(|| format!("failed to bind {}", config.listen));
        }
    };

    info!(
        bind_addr = %listener.local_addr()?,
        "Load balancer running"
    );

    tokio::select! {
        result = listener.run() => {
            result.context("listener failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
