//! Parley relay server -- real-time 1:1 chat relay.
//!
//! An axum WebSocket server that stores messages per conversation, tracks
//! unread counts, and pushes live messages and notifications to connected
//! users. Users are seeded from the `[[users]]` tables of the config file.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin parley-relay
//!
//! # Run on custom address with an explicit config file
//! cargo run --bin parley-relay -- --bind 127.0.0.1:8080 --config relay.toml
//!
//! # Or via environment variable
//! PARLEY_ADDR=127.0.0.1:8080 cargo run --bin parley-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use parley_relay::config::{RelayCliArgs, RelayConfig};
use parley_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, users = config.users.len(), "starting parley relay");
    if config.users.is_empty() {
        tracing::warn!("no users configured; every connection will be rejected");
    }

    let state = match RelayState::from_config(&config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, "invalid user directory");
            std::process::exit(1);
        }
    };

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
