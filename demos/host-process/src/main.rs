//! Host process serving the sample environment.
//!
//! Run with: cargo run -p host-process-example -- <port>
//!
//! Dials `ws://localhost:<port>` and keeps retrying until a Work listener
//! accepts.

use anyhow::Context;
use remote_ctx_host::{HostOptions, RemoteCtxHost, sample::sample_env};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .context("No port provided")?
        .parse()
        .context("Port must be a number")?;

    let host = RemoteCtxHost::new(HostOptions::new(format!("ws://localhost:{port}")))?;
    host.expose(&sample_env());
    tracing::info!("Host process started for port {port}");

    tokio::signal::ctrl_c().await?;
    host.shutdown();
    Ok(())
}
