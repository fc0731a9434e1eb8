//! Per-process tracing bootstrap.
//!
//! Every daemon logs to the file named as its first CLI argument. The
//! `QUAY_LOG` environment variable overrides the default `info` filter with
//! the usual EnvFilter syntax.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber writing to `logfile`. Call once, first
/// thing in `main`.
pub fn init(logfile: &Path) -> Result<()> {
    if let Some(parent) = logfile.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logfile)
        .with_context(|| format!("opening log file {}", logfile.display()))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("QUAY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();

    Ok(())
}
