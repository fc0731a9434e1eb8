//! The inner-zone dialer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quay_core::heartbeat::Heartbeat;
use quay_proto::{is_activetest, FramedStream, ProtoError, ProxyDial, RecvTimeout};

use crate::error::{ProxyError, Result};
use crate::pair::{spawn_pair, PairTable};
use crate::{IDLE_CLOSE_SECS, TICK_SECS};

#[derive(Debug)]
pub struct Dialer {
    relay_addr: SocketAddr,
    pairs: Arc<PairTable>,
}

impl Dialer {
    pub fn new(relay_addr: SocketAddr) -> Self {
        Self {
            relay_addr,
            pairs: Arc::new(PairTable::new()),
        }
    }

    pub fn pairs(&self) -> Arc<PairTable> {
        self.pairs.clone()
    }

    /// Pre-dial the control channel and serve dial requests until the
    /// relay goes away or `cancel` fires.
    pub async fn run(&self, heartbeat: &Heartbeat, cancel: CancellationToken) -> Result<()> {
        let ctl_stream = TcpStream::connect(self.relay_addr).await?;
        let mut control = FramedStream::new(ctl_stream);
        info!("control channel to {} established", self.relay_addr);

        let mut tick = tokio::time::interval(Duration::from_secs(TICK_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                payload = control.recv_str(RecvTimeout::Block) => {
                    let payload = match payload {
                        Ok(payload) => payload,
                        Err(ProtoError::PeerClosed) => {
                            warn!("control channel closed by relay");
                            return Err(ProxyError::ControlLost);
                        }
                        Err(e) => {
                            warn!("control channel error: {e}");
                            return Err(ProxyError::ControlLost);
                        }
                    };

                    if is_activetest(&payload) {
                        continue;
                    }
                    match ProxyDial::decode(&payload) {
                        Ok(dial) => self.open_pair(&dial).await,
                        Err(e) => warn!("ignoring bad control message: {e}"),
                    }
                }
                _ = tick.tick() => {
                    heartbeat.beat().await;
                    self.pairs.sweep_idle(IDLE_CLOSE_SECS);
                }
                _ = cancel.cancelled() => {
                    self.pairs.close_all();
                    return Ok(());
                }
            }
        }
    }

    /// Open the matching outbound pair: one socket back to the relay's
    /// command port, one to the requested inner destination.
    ///
    /// A failed destination connect closes only the relay-bound socket;
    /// the control channel stays up.
    async fn open_pair(&self, dial: &ProxyDial) {
        let to_relay = match TcpStream::connect(self.relay_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("outbound to relay {} failed: {e}", self.relay_addr);
                return;
            }
        };

        let to_dst = match TcpStream::connect((dial.dst_ip.as_str(), dial.dst_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("connect to {}:{} failed: {e}", dial.dst_ip, dial.dst_port);
                drop(to_relay);
                return;
            }
        };

        info!("pair toward {}:{} opened", dial.dst_ip, dial.dst_port);
        spawn_pair(&self.pairs, to_relay, to_dst);
    }
}
