//! Interactive Work console.
//!
//! Run with: cargo run -p work-console-example -- [port]
//!
//! Waits for a Host, then reads dotted paths from stdin and prints what they
//! resolve to. Prefix a path with `=` to print the Host's raw copy instead.

use std::io::{self, BufRead, Write};

use anyhow::Context;
use remote_ctx_work::{Hydrated, RemoteCtx, RemoteCtxOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("Port must be a number")?,
        None => 0,
    };

    let ctx = RemoteCtx::new(RemoteCtxOptions::with_port(port))?;
    tracing::info!("Waiting for a host on port {}", ctx.port());
    ctx.ready()?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            let (raw, path) = line
                .strip_prefix('=')
                .map_or((false, line), |rest| (true, rest.trim()));
            match ctx.host().read_path(path) {
                Ok(value) if raw => match ctx.serialize(&value) {
                    Ok(json) => writeln!(stdout, "{json}")?,
                    Err(e) => writeln!(stdout, "error: {e}")?,
                },
                Ok(value) => writeln!(stdout, "{}", render(&value))?,
                Err(e) => writeln!(stdout, "error: {e}")?,
            }
        }
        write!(stdout, "> ")?;
        stdout.flush()?;
    }
    Ok(())
}

fn render(value: &Hydrated) -> String {
    match value {
        Hydrated::Proxy(proxy) => format!("{proxy:?}"),
        Hydrated::Object(object) => format!("{{ {} }}", object.own_keys().join(", ")),
        other => other
            .to_plain()
            .map_or_else(|e| format!("error: {e}"), |json| json.to_string()),
    }
}
