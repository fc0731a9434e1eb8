//! Bus assembly: pool, queue, workers, watchdog, acceptor.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quay_core::db::{DbDriver, MySqlDriver, Pool, PoolConfig};

use crate::config::BusConfig;
use crate::error::Result;
use crate::queue::{SocketQueue, QUEUE_CAP};
use crate::serve::{handle_connection, BusState};
use crate::workers::{ConnHandler, WorkerPool};

/// Pool sweeper period.
const SWEEP_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct BusServer {
    config: BusConfig,
}

impl BusServer {
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }

    /// Serve until cancelled.
    ///
    /// Startup dials the database once to validate the connection string —
    /// a bus that can never reach its database should die loudly under the
    /// supervisor, not limp. Shutdown stops accepting, cancels workers and
    /// watchdog, and tears the pool down.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let driver = MySqlDriver::new(self.config.connstr.to_options());
        let probe = driver.connect().await?;
        driver.close(probe).await;
        info!("database {} reachable", self.config.connstr);

        let pool = Arc::new(Pool::new(driver, PoolConfig::default()));
        let queue = Arc::new(SocketQueue::new(QUEUE_CAP));

        let state = Arc::new(BusState {
            pool: pool.clone(),
            keepalive: self.config.keepalive,
        });
        let handler: ConnHandler = Arc::new(move |stream: TcpStream| {
            let state = state.clone();
            let fut: futures_util::future::BoxFuture<'static, ()> =
                Box::pin(handle_connection(stream, state));
            fut
        });

        let workers = Arc::new(WorkerPool::start(
            self.config.workers.clone(),
            queue.clone(),
            handler,
        ));

        let watchdog = {
            let workers = workers.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { workers.run_watchdog(cancel).await })
        };
        let sweeper = tokio::spawn(
            pool.clone()
                .run_sweeper(SWEEP_PERIOD, cancel.clone()),
        );

        info!(
            "bus listening on port {} ({} workers{})",
            self.config.port,
            self.config.workers.workers,
            if self.config.keepalive { ", keepalive" } else { "" }
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("client {peer} connected");
                            if let Err(refused) = queue.push(stream) {
                                warn!("socket queue full, dropping {peer}");
                                drop(refused);
                            }
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        workers.shutdown();
        let _ = watchdog.await;
        let _ = sweeper.await;
        pool.shutdown().await;
        info!("bus stopped");
        Ok(())
    }
}
