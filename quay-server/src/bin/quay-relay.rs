//! The outer-zone relay of the reverse-proxy pair.
//!
//! ```text
//! quay-relay /log/quay/relay.log "<routefile>/etc/quay/routes.conf</routefile>\
//! <cmdport>4000</cmdport><hbsock>/run/quay/keeper.sock</hbsock>"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_core::config::WorkerArgs;
use quay_proto::TagBuffer;
use quay_proxy::{load_routes, Relay};

/// The relay is expected to be restarted by the supervisor, so its
/// heartbeat window is short.
const RELAY_HB_TIMEOUT: u64 = 30;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let tags = TagBuffer::new(&args.params);
    let route_file = PathBuf::from(tags.require("routefile").context("routefile is null")?);
    let cmd_port: u16 = tags.require_parse("cmdport").context("cmdport is null")?;
    let hb_sock = tags.get("hbsock").map(PathBuf::from);

    let routes = load_routes(&route_file)
        .with_context(|| format!("loading route table {}", route_file.display()))?;
    info!("loaded {} proxy routes", routes.len());

    let cmd_listener = TcpListener::bind(("0.0.0.0", cmd_port))
        .await
        .with_context(|| format!("binding command port {cmd_port}"))?;

    let mut route_listeners = Vec::with_capacity(routes.len());
    for route in routes {
        let listener = TcpListener::bind(("0.0.0.0", route.listen_port))
            .await
            .with_context(|| format!("binding listen port {}", route.listen_port))?;
        route_listeners.push((listener, route));
    }

    let heartbeat =
        quay_server::heartbeat_or_disabled(hb_sock.as_deref(), "quay-relay", RELAY_HB_TIMEOUT)
            .await?;

    let cancel = CancellationToken::new();
    quay_server::cancel_on_termination(cancel.clone())?;

    info!("relay waiting for the dialer on port {cmd_port}");
    let relay = Relay::new();
    let result = relay
        .run(cmd_listener, route_listeners, &heartbeat, cancel)
        .await;
    heartbeat.unregister().await;

    result.context("relay failed")?;
    info!("relay stopped");
    Ok(())
}
