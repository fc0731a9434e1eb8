//! The HTTP data-service bus.
//!
//! ```text
//! quay-busd /log/quay/busd.log "<connstr>127.0.0.1,quay,secret,idc,3306</connstr>\
//! <charset>utf8</charset><port>8080</port>"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_bus::{BusConfig, BusServer};
use quay_core::config::WorkerArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let config = BusConfig::from_params(&args.params).context("parsing parameters")?;

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;

    let cancel = CancellationToken::new();
    quay_server::cancel_on_termination(cancel.clone())?;

    let server = BusServer::new(config);
    server.run(listener, cancel).await.context("bus failed")?;

    info!("bus stopped");
    Ok(())
}
