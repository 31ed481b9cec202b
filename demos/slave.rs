//! Run the worker side against the well-known channel until interrupted.
//!
//! `cargo run --example slave_demo`

use shm_rendezvous::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let channel = Arc::new(SharedChannel::open_or_create(DEFAULT_CHANNEL_NAME)?);
    let worker = SlaveWorker::new(channel);
    worker.run().await?;
    Ok(())
}
