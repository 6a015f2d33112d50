//! stratad — Strata object/KV storage daemon.

use std::sync::Arc;

use anyhow::Result;

use stratad::{config, worker};
use strata_core::config::StrataConfig;
use worker::Backends;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity,
    // e.g. RUST_LOG=debug cargo run -p stratad
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let strata_config = StrataConfig::load()?;
    let server_config = strata_config.server;

    let backends = Arc::new(Backends {
        object: config::object_backend(&server_config)?,
        kv: config::kv_backend(&server_config)?,
    });
    let stripe_size = server_config.stripe_size as usize;

    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr).await?;
    tracing::info!(addr = %server_config.bind_addr, "stratad listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let backends = backends.clone();
        tracing::debug!(%peer, "accepted connection");
        tokio::spawn(async move {
            worker::serve_connection(stream, backends, stripe_size).await;
            tracing::debug!(%peer, "connection closed");
        });
    }
}
