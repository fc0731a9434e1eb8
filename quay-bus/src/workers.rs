//! The fixed worker pool and its watchdog.
//!
//! Workers are plain tasks draining the socket queue. Each slot carries an
//! activity stamp; a worker refreshes it when it picks up a socket, when
//! its idle wait times out, and when a request completes. The watchdog
//! scans the roster every few seconds and replaces any worker whose stamp
//! has aged past the stuck threshold — abort is the cancellation point, and
//! the replacement takes over the same slot number.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::SocketQueue;

/// The per-connection handler the pool runs.
pub type ConnHandler = Arc<dyn Fn(TcpStream) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    /// Idle wait per queue pop; each timeout refreshes the stamp.
    pub idle_wait: Duration,
    /// A worker older than this is stuck.
    pub stuck_after: Duration,
    /// Watchdog scan period.
    pub watchdog_period: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            idle_wait: Duration::from_secs(20),
            stuck_after: Duration::from_secs(25),
            watchdog_period: Duration::from_secs(3),
        }
    }
}

struct WorkerSlot {
    number: usize,
    last_active: Arc<AtomicI64>,
    handle: JoinHandle<()>,
}

pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<SocketQueue>,
    handler: ConnHandler,
    roster: Mutex<Vec<WorkerSlot>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.workers)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn the full roster.
    pub fn start(config: WorkerConfig, queue: Arc<SocketQueue>, handler: ConnHandler) -> Self {
        let pool = Self {
            config: config.clone(),
            queue,
            handler,
            roster: Mutex::new(Vec::with_capacity(config.workers)),
        };
        let mut roster = pool.roster.lock().expect("worker roster lock");
        for number in 0..config.workers {
            roster.push(pool.spawn_worker(number));
        }
        drop(roster);
        pool
    }

    fn spawn_worker(&self, number: usize) -> WorkerSlot {
        let last_active = Arc::new(AtomicI64::new(now_epoch()));
        let stamp = last_active.clone();
        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let idle_wait = self.config.idle_wait;

        let handle = tokio::spawn(async move {
            loop {
                match queue.pop(idle_wait).await {
                    Some(stream) => {
                        stamp.store(now_epoch(), Ordering::Relaxed);
                        handler(stream).await;
                        stamp.store(now_epoch(), Ordering::Relaxed);
                    }
                    None => {
                        // Idle, not stuck.
                        stamp.store(now_epoch(), Ordering::Relaxed);
                    }
                }
            }
        });

        WorkerSlot {
            number,
            last_active,
            handle,
        }
    }

    /// One watchdog pass; returns how many workers were replaced.
    pub fn check_workers(&self) -> usize {
        let now = now_epoch();
        let stuck_after = self.config.stuck_after.as_secs() as i64;
        let mut replaced = 0;

        let mut roster = self.roster.lock().expect("worker roster lock");
        for index in 0..roster.len() {
            let age = now - roster[index].last_active.load(Ordering::Relaxed);
            if age <= stuck_after {
                continue;
            }
            let number = roster[index].number;
            warn!("worker {number} stuck for {age}s, replacing it");
            roster[index].handle.abort();
            roster[index] = self.spawn_worker(number);
            replaced += 1;
        }
        replaced
    }

    /// Run the watchdog until cancelled.
    pub async fn run_watchdog(&self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.watchdog_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.check_workers();
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Abort the whole roster.
    pub fn shutdown(&self) {
        let roster = self.roster.lock().expect("worker roster lock");
        for slot in roster.iter() {
            slot.handle.abort();
        }
        info!("worker pool stopped");
    }

    /// Slot numbers currently on the roster, in roster order.
    pub fn slot_numbers(&self) -> Vec<usize> {
        self.roster
            .lock()
            .expect("worker roster lock")
            .iter()
            .map(|slot| slot.number)
            .collect()
    }
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn queue_one(queue: &SocketQueue) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        queue.push(server).unwrap();
        client.await.unwrap()
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            workers: 2,
            idle_wait: Duration::from_millis(200),
            stuck_after: Duration::from_secs(1),
            watchdog_period: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let queue = Arc::new(SocketQueue::new(16));
        let served = Arc::new(AtomicUsize::new(0));

        let handler: ConnHandler = {
            let served = served.clone();
            Arc::new(move |mut stream: TcpStream| {
                let served = served.clone();
                let fut: BoxFuture<'static, ()> = Box::pin(async move {
                    let _ = stream.write_all(b"hi").await;
                    served.fetch_add(1, Ordering::SeqCst);
                });
                fut
            })
        };
        let pool = WorkerPool::start(test_config(), queue.clone(), handler);

        let _a = queue_one(&queue).await;
        let _b = queue_one(&queue).await;
        let _c = queue_one(&queue).await;

        for _ in 0..100 {
            if served.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(served.load(Ordering::SeqCst), 3);
        pool.shutdown();
    }

    /// A stuck worker is replaced in its own slot and service continues;
    /// no request is served twice.
    #[tokio::test]
    async fn watchdog_replaces_stuck_worker_in_place() {
        let queue = Arc::new(SocketQueue::new(16));
        let served = Arc::new(AtomicUsize::new(0));

        // First request hangs forever; later ones answer.
        let hung = Arc::new(AtomicUsize::new(0));
        let handler: ConnHandler = {
            let served = served.clone();
            let hung = hung.clone();
            Arc::new(move |mut stream: TcpStream| {
                let served = served.clone();
                let hung = hung.clone();
                let fut: BoxFuture<'static, ()> = Box::pin(async move {
                    if hung.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    let _ = stream.write_all(b"ok").await;
                    served.fetch_add(1, Ordering::SeqCst);
                });
                fut
            })
        };

        let config = WorkerConfig {
            workers: 1,
            ..test_config()
        };
        let pool = Arc::new(WorkerPool::start(config, queue.clone(), handler));
        let watchdog_cancel = CancellationToken::new();
        {
            let pool = pool.clone();
            let cancel = watchdog_cancel.clone();
            tokio::spawn(async move { pool.run_watchdog(cancel).await });
        }

        let _stuck_client = queue_one(&queue).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Watchdog needs stuck_after (1s) plus a scan to act.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(pool.slot_numbers(), vec![0], "slot number is preserved");

        // The replacement serves new requests.
        let _ok_client = queue_one(&queue).await;
        for _ in 0..100 {
            if served.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(served.load(Ordering::SeqCst), 1, "exactly the second request is served");
        assert_eq!(hung.load(Ordering::SeqCst), 2, "each request was handled once");

        watchdog_cancel.cancel();
        pool.shutdown();
    }

    #[tokio::test]
    async fn idle_workers_stay_off_the_watchdogs_radar() {
        let queue = Arc::new(SocketQueue::new(4));
        let handler: ConnHandler = Arc::new(|_stream| {
            let fut: BoxFuture<'static, ()> = Box::pin(async {});
            fut
        });
        let pool = WorkerPool::start(test_config(), queue, handler);

        // Longer than stuck_after; idle refreshes must keep them alive.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(pool.check_workers(), 0);
        pool.shutdown();
    }
}
