//! mq-client — a thin host process for a persistent `Client` connection.
//!
//! Dials the configured server, logs connect/disconnect transitions, and
//! blocks forever handing inbound Requests/Statements an empty receiver
//! (a real caller embeds `mq-services::Client` directly; this binary only
//! exists so the substrate has a runnable counterpart to `mqd`).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use mq_conn::{FnOperator, FnReceiver};
use mq_core::config::load_client_opts;
use mq_core::Chunk;
use mq_services::Client;

#[derive(Parser)]
#[command(name = "mq-client", about = "Message-queue substrate client process")]
struct Args {
    /// Path to the client's ini-format config file.
    #[arg(long)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let opts =
        load_client_opts(&args.config).with_context(|| format!("loading {}", args.config))?;

    let op = Arc::new(FnOperator::new(
        Some(Box::new(|id: Chunk| tracing::info!(server = %id, "connected"))),
        Some(Box::new(|id: Chunk| tracing::info!(server = %id, "disconnected"))),
    ));

    let client = Client::connect(opts.location.clone(), &opts.name, &opts.token, op);
    tracing::info!(location = %opts.location, name = %opts.name, "mq-client dialing");

    let receiver = FnReceiver::default();
    loop {
        if let Err(e) = client.receive(&receiver).await {
            tracing::warn!(error = %e, "receive loop exiting");
            break;
        }
    }

    Ok(())
}
