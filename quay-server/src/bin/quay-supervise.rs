//! The process supervisor: spawn a command, wait for it to exit, sleep,
//! spawn it again. Forever.
//!
//! ```text
//! quay-supervise /log/quay/supervise_busd.log 10 /usr/local/bin/quay-busd /log/quay/busd.log "<...>"
//! ```
//!
//! The supervisor detaches from the launching shell and ignores the
//! ordinary termination signals; only `kill -9` ends it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "quay-supervise")]
#[command(about = "Respawn a worker every interval seconds after it exits")]
struct Args {
    /// Log file for the supervisor itself.
    logfile: PathBuf,

    /// Seconds to wait after the child exits before respawning it.
    interval: u64,

    /// The command to supervise.
    command: String,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Detach before anything else: re-parent to init, drop the controlling
    // terminal, send stdio to /dev/null.
    nix::unistd::daemon(true, false).context("detaching from the shell")?;

    quay_core::logging::init(&args.logfile)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(supervise(args))
}

async fn supervise(args: Args) -> Result<()> {
    ignore_termination_signals()?;

    info!(
        "supervising {} {:?} (interval {}s)",
        args.command, args.args, args.interval
    );

    loop {
        match tokio::process::Command::new(&args.command)
            .args(&args.args)
            .spawn()
        {
            Ok(mut child) => match child.wait().await {
                Ok(status) => info!("{} exited with {status}", args.command),
                Err(e) => warn!("waiting on {} failed: {e}", args.command),
            },
            Err(e) => warn!("spawning {} failed: {e}", args.command),
        }

        tokio::time::sleep(Duration::from_secs(args.interval)).await;
    }
}

/// Swallow every ordinary way of asking this process to die.
fn ignore_termination_signals() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::hangup(),
        SignalKind::quit(),
    ] {
        let mut stream = signal(kind).context("installing signal handler")?;
        tokio::spawn(async move {
            loop {
                stream.recv().await;
                info!("ignoring termination signal");
            }
        });
    }
    Ok(())
}
