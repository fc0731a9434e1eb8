//! The outer-zone relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quay_core::heartbeat::Heartbeat;
use quay_proto::{FramedStream, ProxyDial, ACTIVETEST};

use crate::error::{ProxyError, Result};
use crate::pair::{spawn_pair, PairTable};
use crate::route::Route;
use crate::{IDLE_CLOSE_SECS, TICK_SECS};

/// How long the dialer gets to present its fresh outbound after a dial
/// request.
const PAIR_ACCEPT_SECS: u64 = 10;

#[derive(Debug)]
pub struct Relay {
    pairs: Arc<PairTable>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            pairs: Arc::new(PairTable::new()),
        }
    }

    pub fn pairs(&self) -> Arc<PairTable> {
        self.pairs.clone()
    }

    /// Serve until the control channel dies or `cancel` fires.
    ///
    /// `cmd_listener` is the port the dialer speaks to: its first
    /// connection becomes the control channel, every later one is a fresh
    /// outbound answering a dial request. `route_listeners` are the
    /// pre-bound external listen ports with their routes.
    ///
    /// Any control-channel send failure is fatal — the supervisor restarts
    /// the relay, and the dialer reconnects.
    pub async fn run(
        &self,
        cmd_listener: TcpListener,
        route_listeners: Vec<(TcpListener, Route)>,
        heartbeat: &Heartbeat,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (ctl_stream, ctl_peer) = cmd_listener.accept().await?;
        let mut control = FramedStream::new(ctl_stream);
        info!("control channel established with {ctl_peer}");

        // One accept task per route feeds a single pairing loop, which
        // owns the control channel and the cmd listener so that dial
        // request and matching accept stay strictly ordered.
        let (accepted_tx, mut accepted_rx) = mpsc::channel::<(TcpStream, Route)>(32);
        for (listener, route) in route_listeners {
            let accepted_tx = accepted_tx.clone();
            let accept_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                info!("port {} client {peer} connected", route.listen_port);
                                if accepted_tx.send((stream, route.clone())).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("accept on port {} failed: {e}", route.listen_port),
                        },
                        _ = accept_cancel.cancelled() => return,
                    }
                }
            });
        }
        drop(accepted_tx);

        let mut tick = tokio::time::interval(Duration::from_secs(TICK_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; that one
        // only refreshes the heartbeat.
        tick.tick().await;
        heartbeat.beat().await;

        loop {
            tokio::select! {
                accepted = accepted_rx.recv() => {
                    // The accept tasks only stop on cancellation.
                    let Some((src, route)) = accepted else {
                        return Ok(());
                    };
                    self.pair_up(&mut control, &cmd_listener, src, &route).await?;
                }
                _ = tick.tick() => {
                    heartbeat.beat().await;
                    if let Err(e) = control.send_str(ACTIVETEST).await {
                        warn!("control channel heartbeat failed: {e}");
                        return Err(ProxyError::ControlLost);
                    }
                    self.pairs.sweep_idle(IDLE_CLOSE_SECS);
                }
                _ = cancel.cancelled() => {
                    self.pairs.close_all();
                    return Ok(());
                }
            }
        }
    }

    /// Ask the dialer for an outbound toward the route's destination and
    /// splice it with the freshly accepted external client.
    async fn pair_up(
        &self,
        control: &mut FramedStream<TcpStream>,
        cmd_listener: &TcpListener,
        src: TcpStream,
        route: &Route,
    ) -> Result<()> {
        let dial = ProxyDial {
            dst_ip: route.dst_ip.clone(),
            dst_port: route.dst_port,
        };
        if let Err(e) = control.send_str(&dial.encode()).await {
            warn!("control channel lost while dialing {}: {e}", route.dst_ip);
            return Err(ProxyError::ControlLost);
        }

        let accepted = tokio::time::timeout(
            Duration::from_secs(PAIR_ACCEPT_SECS),
            cmd_listener.accept(),
        )
        .await;
        let dst = match accepted {
            Ok(Ok((stream, _peer))) => stream,
            Ok(Err(e)) => {
                warn!("accepting dialer outbound failed: {e}");
                return Ok(());
            }
            Err(_) => {
                warn!(
                    "dialer produced no outbound for {}:{} in {PAIR_ACCEPT_SECS}s",
                    route.dst_ip, route.dst_port
                );
                return Ok(());
            }
        };

        spawn_pair(&self.pairs, src, dst);
        Ok(())
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
