//! The file-transfer server.
//!
//! ```text
//! quay-fileserver /log/quay/fileserver.log "<port>5005</port><hbsock>/run/quay/keeper.sock</hbsock>"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_core::config::WorkerArgs;
use quay_transfer::{ServerConfig, TransferServer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let config = ServerConfig::from_params(&args.params).context("parsing parameters")?;

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!("file server listening on {}", config.port);

    let cancel = CancellationToken::new();
    quay_server::cancel_on_termination(cancel.clone())?;

    let server = TransferServer::new(config);
    server.run(listener, cancel).await.context("file server failed")?;

    info!("file server stopped");
    Ok(())
}
