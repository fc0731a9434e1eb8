//! The transfer server: accept loop plus one task per session.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quay_core::heartbeat::Heartbeat;
use quay_proto::{FramedStream, LoginRequest, ProtoError, RecvTimeout, SessionKind};

use crate::config::ServerConfig;
use crate::error::{Result, TransferError};
use crate::session::{run_receiver, run_sender, RecvOptions, SendOptions};
use crate::walker::MatchRules;

/// How long a freshly accepted connection gets to present its login.
const LOGIN_SECS: u64 = 20;

#[derive(Debug)]
pub struct TransferServer {
    config: ServerConfig,
}

impl TransferServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Accept sessions until cancelled. Each session runs in its own task
    /// and owns all of its state, so a misbehaving peer damages nothing
    /// but its own connection.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!("client {peer} connected");
                    let hb_sock = self.config.hb_sock.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session(stream, peer, hb_sock).await {
                            match e {
                                TransferError::Proto(ProtoError::PeerClosed) => {
                                    info!("client {peer} disconnected");
                                }
                                e => warn!("session with {peer} ended: {e}"),
                            }
                        }
                    });
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}

async fn session(stream: TcpStream, peer: SocketAddr, hb_sock: Option<PathBuf>) -> Result<()> {
    let mut framed = FramedStream::new(stream);

    let payload = framed.recv_str(RecvTimeout::Secs(LOGIN_SECS)).await?;
    let login = match LoginRequest::decode(&payload) {
        Ok(login) => {
            framed.send_str("ok").await?;
            login
        }
        Err(e) => {
            framed.send_str("failed").await?;
            return Err(e.into());
        }
    };
    info!("{peer} login ok ({}, {:?})", login.pname, login.kind);

    // The server's heartbeat name marks the session as the server half.
    let heartbeat = match &hb_sock {
        Some(sock) => {
            let name = format!("{}_srv", login.pname);
            match Heartbeat::register(sock, &name, login.timeout).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("heartbeat registration failed, continuing without: {e}");
                    Heartbeat::disabled()
                }
            }
        }
        None => Heartbeat::disabled(),
    };

    let result = match login.kind {
        SessionKind::Push => {
            let opts = RecvOptions {
                from_prefix: login.client_path.clone(),
                to_prefix: login.srv_path.clone(),
                timetvl: login.timetvl,
            };
            run_receiver(&mut framed, &opts, &heartbeat).await
        }
        SessionKind::Pull => {
            let rules = MatchRules::parse(&login.match_name)?;
            let opts = SendOptions {
                root: PathBuf::from(&login.srv_path),
                backup_root: login.srv_path_bak.clone().map(PathBuf::from),
                policy: login.policy,
                rules,
                recursive: login.and_child,
                timetvl: login.timetvl,
            };
            run_sender(&mut framed, &opts, &heartbeat).await
        }
    };

    heartbeat.unregister().await;
    result
}
