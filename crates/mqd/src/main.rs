//! mqd — the message-queue substrate's server daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use mq_conn::FnOperator;
use mq_core::config::load_server_opts;
use mq_core::Chunk;
use mq_services::Server;

#[derive(Parser)]
#[command(name = "mqd", about = "Message-queue substrate server daemon")]
struct Args {
    /// Path to the server's ini-format config file.
    #[arg(long)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity
    // e.g. RUST_LOG=debug cargo run -p mqd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let opts =
        load_server_opts(&args.config).with_context(|| format!("loading {}", args.config))?;

    let (id, _) = Chunk::from_str(&opts.name);
    let clients: Vec<(Chunk, Chunk)> = opts
        .clients
        .iter()
        .map(|kt| (Chunk::from_str(&kt.key).0, Chunk::from_str(&kt.token).0))
        .collect();

    let op = Arc::new(FnOperator::new(
        Some(Box::new(|id: Chunk| tracing::info!(key = %id, "client connected"))),
        Some(Box::new(|id: Chunk| tracing::info!(key = %id, "client disconnected"))),
    ));

    let server = Server::bind(&opts.location, id, op, &clients)
        .await
        .with_context(|| format!("binding {}", opts.location))?;

    tracing::info!(location = %opts.location, name = %opts.name, "mqd listening");
    server.run().await;

    Ok(())
}
