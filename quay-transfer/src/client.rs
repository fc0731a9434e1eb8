//! The push and pull clients.

use std::path::PathBuf;

use tokio::net::TcpStream;
use tracing::info;

use quay_core::heartbeat::Heartbeat;
use quay_proto::{FramedStream, RecvTimeout};

use crate::config::ClientConfig;
use crate::error::{Result, TransferError};
use crate::session::{run_receiver, run_sender, RecvOptions, SendOptions};
use crate::walker::MatchRules;

const LOGIN_REPLY_SECS: u64 = 20;

/// Push loop: scan the local outbox, stream matches to the server, apply
/// the post-transfer policy. Runs until the connection breaks.
pub async fn run_push_client(config: &ClientConfig, heartbeat: &Heartbeat) -> Result<()> {
    let mut framed = connect_and_login(config).await?;
    let rules = MatchRules::parse(&config.match_name)?;
    let opts = SendOptions {
        root: PathBuf::from(&config.client_path),
        backup_root: config.client_path_bak.clone().map(PathBuf::from),
        policy: config.policy,
        rules,
        recursive: config.and_child,
        timetvl: config.timetvl,
    };
    run_sender(&mut framed, &opts, heartbeat).await
}

/// Pull loop: the server scans its inbox and streams matches down; land
/// them under the local root. Runs until the connection breaks.
pub async fn run_pull_client(config: &ClientConfig, heartbeat: &Heartbeat) -> Result<()> {
    let mut framed = connect_and_login(config).await?;
    let opts = RecvOptions {
        from_prefix: config.srv_path.clone(),
        to_prefix: config.client_path.clone(),
        timetvl: config.timetvl,
    };
    run_receiver(&mut framed, &opts, heartbeat).await
}

async fn connect_and_login(config: &ClientConfig) -> Result<FramedStream<TcpStream>> {
    let stream =
        TcpStream::connect((config.server_ip.as_str(), config.server_port)).await?;
    let mut framed = FramedStream::new(stream);

    framed.send_str(&config.login_request().encode()).await?;
    let reply = framed.recv_str(RecvTimeout::Secs(LOGIN_REPLY_SECS)).await?;
    if reply != "ok" {
        return Err(TransferError::LoginRefused);
    }

    info!(
        "login to {}:{} ok ({})",
        config.server_ip, config.server_port, config.pname
    );
    Ok(framed)
}
