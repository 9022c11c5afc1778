//! Logging configuration using tracing.

use crate::utils::fs::ensure_parent_dir;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `log_file` set, output is
/// appended to that file without ANSI colors instead of going to stderr;
/// on the device nothing reads stderr and the screen belongs to the updater.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            ensure_parent_dir(path)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .try_init()?;
        }
        None => {
            registry.with(fmt::layer().with_writer(io::stderr).with_target(false)).try_init()?;
        }
    }

    Ok(())
}
