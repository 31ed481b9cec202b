//! Dispatch one range-sum request to a running slave and print the report.
//!
//! Run the slave first (`cargo run --example slave_demo`), then:
//! `cargo run --example master_demo`

use shm_rendezvous::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let channel = Arc::new(SharedChannel::open_or_create(DEFAULT_CHANNEL_NAME)?);

    // The demo pair runs the Rust worker, so match on its binary name
    // rather than a python script.
    let discovery = Arc::new(ProcessScanDiscovery::any_interpreter("slave_demo"));
    let watcher = DiscoveryWatcher::spawn(discovery, Duration::from_millis(1000));

    // Give the first probe a moment to land.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    info!(status = ?watcher.status(), "slave discovery");

    let dispatcher = Dispatcher::new(channel, watcher.subscribe(), RendezvousConfig::default());
    let handle = dispatcher.dispatch(CycleInputs {
        folder: std::env::current_dir()?.join("outputs"),
        start: 0,
        end: 100,
    })?;

    let mut progress = handle.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            info!(progress = ?*progress.borrow(), "cycle progress");
        }
    });

    let report = handle.report().await;
    match report.outcome {
        Ok(output) => {
            info!(
                request = report.request,
                sum = output.sum,
                elapsed_ms = report.elapsed.as_millis() as u64,
                slave_elapsed_ms = ?output.slave_elapsed_ms,
                "cycle succeeded"
            );
            println!("{}", output.file_content);
        }
        Err(e) => {
            info!(request = report.request, "cycle failed: {e}");
        }
    }

    Ok(())
}
