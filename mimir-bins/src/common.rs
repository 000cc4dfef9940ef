//! Common utilities for the binaries
//!
//! Logging init and config loading, shared by the simulator and the
//! journal viewer.

use std::path::Path;

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mimir_core::config::SimulatorConfig;

/// Initialize tracing. `RUST_LOG` wins over the CLI level.
pub fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_ids(true))
            .init();
    }
    Ok(())
}

/// Load the simulator config, or defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<SimulatorConfig> {
    match path {
        Some(path) => {
            let config = SimulatorConfig::load(path)?;
            tracing::info!(config = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => {
            tracing::info!("no config file given, using defaults");
            Ok(SimulatorConfig::default())
        }
    }
}
