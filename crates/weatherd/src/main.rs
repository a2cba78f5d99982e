//! Weather Mixer Daemon - Main Entry Point

use anyhow::Context;
use std::path::PathBuf;
use tracing::info;
use weatherd::{init_logging, run, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref()).context("Failed to load settings")?;
    init_logging(&settings.log_level, settings.log_json)?;

    info!("=== weatherd v{} ===", env!("CARGO_PKG_VERSION"));
    run(settings).await
}
