//! The pull client: the server scans its inbox and streams matches down.
//!
//! ```text
//! quay-getfiles /log/quay/getfiles_surfdata.log "<ip>192.168.174.133</ip><port>5005</port>\
//! <ptype>2</ptype><srvpath>/idcdata/surfdata_out</srvpath><srvpathbak>/idcdata/surfdata_outbak</srvpathbak>\
//! <andchild>true</andchild><matchname>*.XML</matchname><clientpath>/idcdata/surfdata</clientpath>\
//! <timetvl>10</timetvl><timeout>50</timeout><pname>getfiles_surfdata</pname>"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use quay_core::config::WorkerArgs;
use quay_proto::SessionKind;
use quay_transfer::{run_pull_client, ClientConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let config =
        ClientConfig::from_params(&args.params, SessionKind::Pull).context("parsing parameters")?;
    let heartbeat = quay_server::heartbeat_or_disabled(
        config.hb_sock.as_deref(),
        &config.pname,
        config.timeout,
    )
    .await?;

    let result = run_pull_client(&config, &heartbeat).await;
    heartbeat.unregister().await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("pull session ended: {e}");
            Err(e.into())
        }
    }
}
