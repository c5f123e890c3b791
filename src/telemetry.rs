use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging: stdout, or append to `log_path` when enabled
///
/// # Errors
/// Returns error if the log file or its directory cannot be created
pub fn init(config: &TelemetryConfig) -> Result<()> {
    if !config.enabled {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .init();
        return Ok(());
    }

    let expanded_path = Config::expand_path(&config.log_path)?;

    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}
