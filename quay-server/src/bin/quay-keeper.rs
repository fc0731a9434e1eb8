//! The heartbeat keeper: owns the registry, serves the Unix socket, reaps
//! timed-out workers.
//!
//! ```text
//! quay-keeper /log/quay/keeper.log "<sockpath>/run/quay/keeper.sock</sockpath>"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_core::config::WorkerArgs;
use quay_core::heartbeat::{Keeper, Registry, REGISTRY_CAPACITY};
use quay_proto::TagBuffer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let tags = TagBuffer::new(&args.params);
    let sock_path = PathBuf::from(tags.require("sockpath").context("sockpath is null")?);
    let capacity = tags
        .get_parse::<usize>("capacity")
        .context("bad capacity")?
        .unwrap_or(REGISTRY_CAPACITY);

    // A socket file left by a dead keeper would block the bind.
    match std::fs::remove_file(&sock_path) {
        Ok(()) => info!("removed stale socket {}", sock_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("clearing stale keeper socket"),
    }

    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("binding {}", sock_path.display()))?;
    info!("keeper listening on {} ({capacity} slots)", sock_path.display());

    let cancel = CancellationToken::new();
    quay_server::cancel_on_termination(cancel.clone())?;

    let keeper = Keeper::new(Registry::with_capacity(capacity));
    tokio::join!(
        keeper.serve(listener, cancel.clone()),
        keeper.run_reaper(cancel.clone()),
    );

    let _ = std::fs::remove_file(&sock_path);
    info!("keeper stopped");
    Ok(())
}
