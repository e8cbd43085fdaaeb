//! Coordinator binary: recovers a failed storage node's write-ahead logs
//! by farming out per-file split work to a fleet of live workers.

use std::sync::Arc;

use anyhow::Context;
use logsplit_coordinator::args::Args;
use logsplit_coordinator::client::memory::MemoryCoordinationClient;
use logsplit_coordinator::client::WorkerId;
use logsplit_coordinator::Coordinator;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(err) = run(args).await {
        error!("FATAL ERROR: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = args
        .resolve_config()
        .context("failed to resolve configuration")?;
    debug!(?config, "resolved coordinator configuration");

    // The real coordination store adapter is out of scope (§1); this
    // binary wires up the in-memory reference client so `splitBatch` has
    // somewhere to publish tasks.
    let client = Arc::new(MemoryCoordinationClient::new());
    let self_id = WorkerId::from("coordinator-1");
    let coordinator = Coordinator::new(client, config, self_id);

    coordinator
        .initialize()
        .await
        .context("failed to initialize coordinator (orphan discovery)")?;

    let total_bytes = coordinator
        .split_batch(&args.log_dirs)
        .await
        .context("splitBatch failed")?;
    info!(total_bytes, "split batch complete");

    coordinator.stop().await;
    Ok(())
}
