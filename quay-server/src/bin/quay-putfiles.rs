//! The push client: scan a local outbox and upload matches.
//!
//! ```text
//! quay-putfiles /log/quay/putfiles_surfdata.log "<ip>192.168.174.133</ip><port>5005</port>\
//! <ptype>1</ptype><clientpath>/idcdata/surfdata</clientpath><andchild>true</andchild>\
//! <matchname>*.XML,*.CSV,*.JSON</matchname><srvpath>/idcdata/surfdata_in</srvpath>\
//! <timetvl>10</timetvl><timeout>50</timeout><pname>putfiles_surfdata</pname>"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use quay_core::config::WorkerArgs;
use quay_proto::SessionKind;
use quay_transfer::{run_push_client, ClientConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let config =
        ClientConfig::from_params(&args.params, SessionKind::Push).context("parsing parameters")?;
    let heartbeat = quay_server::heartbeat_or_disabled(
        config.hb_sock.as_deref(),
        &config.pname,
        config.timeout,
    )
    .await?;

    // The session runs until the connection breaks; the supervisor
    // restarts us.
    let result = run_push_client(&config, &heartbeat).await;
    heartbeat.unregister().await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("push session ended: {e}");
            Err(e.into())
        }
    }
}
