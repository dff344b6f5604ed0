// crates/server/src/main.rs
//! longrun server binary.
//!
//! Parses configuration, wires the in-memory guard and tracker, starts the
//! retention sweep and serves the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use longrun_server::{create_app, init_metrics, state::AppState, ServerConfig};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn,longrun_server=info,longrun_core=info".into());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_json);

    let guard_config = config.guard();
    guard_config.validate().context("invalid configuration")?;

    init_metrics();

    let state = AppState::new(guard_config, config.item_delay());
    let _maintenance = longrun_server::spawn_maintenance(state.clone(), config.sweep_interval());
    let app = create_app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        lease_secs = config.lease_secs,
        heartbeat_secs = config.heartbeat_secs,
        "longrun listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
