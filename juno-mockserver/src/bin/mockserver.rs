//! # Mock Store Binary
//!
//! Purpose: Run the mock store as a standalone process for local
//! development against the client.
//!
//! Usage: `juno-mockserver [listen-addr] [advertise-ip]`, defaulting to
//! `127.0.0.1:8080`. Set `RUST_LOG` to adjust log verbosity.

use std::env;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use juno_mockserver::server::{self, ServerOptions, ServerState};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let advertise_ip = args
        .next()
        .map(|raw| raw.parse::<IpAddr>())
        .transpose()
        .context("advertise address must be an IP address")?;

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, ?advertise_ip, "mock store listening");

    let state = Arc::new(ServerState::new(ServerOptions {
        advertise_ip,
        ..ServerOptions::default()
    }));

    tokio::select! {
        result = server::serve(listener, state) => result.context("accept loop failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
