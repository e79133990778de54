//! `FleetChat` relay server.
//!
//! An axum server holding conversations in memory. Clients use the REST
//! routes for history and sends and a WebSocket for live pushes.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin fleetchat-relay
//!
//! # Run on custom address with a customer list
//! cargo run --bin fleetchat-relay -- --bind 127.0.0.1:8080 --config relay.toml
//!
//! # Or via environment variable
//! FLEETCHAT_RELAY_ADDR=127.0.0.1:8080 cargo run --bin fleetchat-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use fleetchat_relay::config::{RelayCliArgs, RelayConfig};
use fleetchat_relay::relay::{self, RelayState};

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

    tracing::info!(
        addr = %config.bind_addr,
        customers = config.customers.len(),
        "starting fleetchat relay"
    );

    let state = Arc::new(RelayState::new(config.customers));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    }
}
