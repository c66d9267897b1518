//! Standalone qirc worker: compiles one request from stdin to stdout.
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`).

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match qirc_worker::serve_stdio().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("worker failed: {err}");
            ExitCode::FAILURE
        }
    }
}
