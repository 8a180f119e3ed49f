use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod preview;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=livepeek_capture=trace shows every dropped sample.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("LivePeek v{} starting", env!("CARGO_PKG_VERSION"));

    let result = app::run().await;
    if let Err(e) = &result {
        error!("Fatal error: {:#}", e);
    }
    result
}
