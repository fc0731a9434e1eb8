//! The inner-zone dialer of the reverse-proxy pair.
//!
//! ```text
//! quay-dialer /log/quay/dialer.log "<relayip>203.0.113.7</relayip>\
//! <relayport>4000</relayport><hbsock>/run/quay/keeper.sock</hbsock>"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_core::config::WorkerArgs;
use quay_proto::TagBuffer;
use quay_proxy::Dialer;

const DIALER_HB_TIMEOUT: u64 = 30;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let tags = TagBuffer::new(&args.params);
    let relay_ip: IpAddr = tags
        .require_parse("relayip")
        .context("relayip is null or invalid")?;
    let relay_port: u16 = tags.require_parse("relayport").context("relayport is null")?;
    let hb_sock = tags.get("hbsock").map(PathBuf::from);

    let heartbeat =
        quay_server::heartbeat_or_disabled(hb_sock.as_deref(), "quay-dialer", DIALER_HB_TIMEOUT)
            .await?;

    let cancel = CancellationToken::new();
    quay_server::cancel_on_termination(cancel.clone())?;

    let dialer = Dialer::new(SocketAddr::new(relay_ip, relay_port));
    let result = dialer.run(&heartbeat, cancel).await;
    heartbeat.unregister().await;

    result.context("dialer failed")?;
    info!("dialer stopped");
    Ok(())
}
