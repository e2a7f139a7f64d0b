//! corona-sink - reference ingestion server
//!
//! Accepts `POST /api/ingest` with a JSON array of events. Point the collector
//! at `http://<addr>/api/ingest`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use corona_core::sink::{self, INGEST_PATH};
use corona_core::Config;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "corona-sink")]
#[command(about = "Reference ingestion sink for Corona Analytics")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        corona_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    let local = listener.local_addr().context("failed to read bound address")?;

    tracing::info!(addr = %local, "Sink listening");
    println!("Listening on http://{}{}", local, INGEST_PATH);

    sink::serve(listener, None)
        .await
        .context("sink server failed")
}
