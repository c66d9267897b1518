//! Hidden `worker` subcommand: the child side of `qirc compile`.

use anyhow::{Context, Result};
use tracing::warn;

/// Serve one request on stdin/stdout.
pub async fn execute() -> Result<()> {
    let served = qirc_worker::serve_stdio()
        .await
        .context("Worker failed to serve request")?;
    if !served {
        warn!("worker started without a request");
    }
    Ok(())
}
