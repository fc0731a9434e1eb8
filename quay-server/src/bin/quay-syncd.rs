//! The incremental table-synchronization worker.
//!
//! ```text
//! quay-syncd /log/quay/syncd_mind2.log "<localconnstr>10.0.0.1,quay,pw,idc,3306</localconnstr>\
//! <remoteconnstr>10.0.0.2,quay,pw,idc,3306</remoteconnstr><charset>utf8</charset>\
//! <remotetname>T_ZHOBTMIND1</remotetname><localtname>T_ZHOBTMIND2</localtname>\
//! <remotekeycol>keyid</remotekeycol><localkeycol>recid</localkeycol>\
//! <timetvl>2</timetvl><timeout>50</timeout><pname>syncd_mind2</pname>"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use quay_core::config::WorkerArgs;
use quay_sync::{IncrementalSync, SyncConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let config = SyncConfig::from_params(&args.params).context("parsing parameters")?;
    let heartbeat = quay_server::heartbeat_or_disabled(
        config.hb_sock.as_deref(),
        &config.pname,
        config.timeout,
    )
    .await?;

    let cancel = CancellationToken::new();
    quay_server::cancel_on_termination(cancel.clone())?;

    let mut worker = IncrementalSync::new(config);
    let result = tokio::select! {
        result = worker.run(&heartbeat) => result,
        _ = cancel.cancelled() => Ok(()),
    };
    heartbeat.unregister().await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("sync aborted: {e}");
            Err(e.into())
        }
    }
}
