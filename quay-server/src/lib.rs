//! Shared bootstrap for the Quay binaries.
//!
//! Every daemon starts the same way: parse `<logfile> <paramxml>`, point
//! tracing at the logfile, parse the parameter buffer into its typed
//! config, optionally register with the heartbeat keeper, then run until
//! its work ends or a termination signal arrives.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_core::heartbeat::Heartbeat;

/// Register with the keeper when a socket is configured.
///
/// A configured-but-unreachable keeper is a startup error: a worker that
/// thinks it is policed but is not would be the worst of both worlds.
pub async fn heartbeat_or_disabled(
    hb_sock: Option<&Path>,
    name: &str,
    timeout_secs: u64,
) -> Result<Heartbeat> {
    match hb_sock {
        None => Ok(Heartbeat::disabled()),
        Some(sock) => Heartbeat::register(sock, name, timeout_secs)
            .await
            .with_context(|| format!("registering {name} with keeper at {}", sock.display())),
    }
}

/// Cancel the token when SIGINT or SIGTERM arrives.
pub fn cancel_on_termination(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("SIGINT, shutting down"),
            _ = terminate.recv() => info!("SIGTERM, shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}
