//! The fixed-slot connection pool.
//!
//! A pool is an array of slots, each holding an optional live connection
//! behind its own async mutex. There is no pool-wide lock: `get` try-locks
//! slots in order and the sweeper try-locks too, so a sweep never blocks a
//! requester. A slot whose mutex is held belongs exclusively to the holder;
//! `conn.is_none()` marks a slot that has not been dialed (or has been
//! disconnected by the sweeper).

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::driver::{DbDriver, DbError, Result};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            idle_timeout: Duration::from_secs(50),
        }
    }
}

struct SlotState<C> {
    conn: Option<C>,
    /// Meaningful only while `conn` is `Some`.
    last_used: Instant,
}

pub struct Pool<D: DbDriver> {
    driver: D,
    slots: Vec<Arc<Mutex<SlotState<D::Conn>>>>,
    idle_timeout: Duration,
}

impl<D: DbDriver> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.slots.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// A connection checked out of the pool. Holds the slot mutex; dropping it
/// stamps the slot's `last_used` and releases the lock, which is the whole
/// of `release`.
pub struct PooledConn<C: Send + 'static> {
    guard: OwnedMutexGuard<SlotState<C>>,
}

impl<C: Send + 'static> std::fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn").finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Invariant: a PooledConn is only constructed over a dialed slot.
        self.guard.conn.as_ref().expect("pooled slot holds a connection")
    }
}

impl<C: Send + 'static> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.guard.conn.as_mut().expect("pooled slot holds a connection")
    }
}

impl<C: Send + 'static> Drop for PooledConn<C> {
    fn drop(&mut self) {
        self.guard.last_used = Instant::now();
    }
}

impl<D: DbDriver> Pool<D> {
    pub fn new(driver: D, config: PoolConfig) -> Self {
        let slots = (0..config.capacity)
            .map(|_| {
                Arc::new(Mutex::new(SlotState {
                    conn: None,
                    last_used: Instant::now(),
                }))
            })
            .collect();
        Self {
            driver,
            slots,
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Check a connection out.
    ///
    /// One pass over the slots: prefer an unlocked slot that is already
    /// dialed; remember the first unlocked undialed slot as a fallback and
    /// dial it (still under its lock) only when no live slot was free.
    pub async fn get(&self) -> Result<PooledConn<D::Conn>> {
        let mut fallback: Option<OwnedMutexGuard<SlotState<D::Conn>>> = None;

        for slot in &self.slots {
            let Ok(mut guard) = slot.clone().try_lock_owned() else {
                continue;
            };
            if guard.conn.is_some() {
                guard.last_used = Instant::now();
                return Ok(PooledConn { guard });
            }
            if fallback.is_none() {
                fallback = Some(guard);
            }
            // A second undialed slot is released right here as `guard` drops.
        }

        let Some(mut guard) = fallback else {
            return Err(DbError::Exhausted);
        };

        match self.driver.connect().await {
            Ok(conn) => {
                guard.conn = Some(conn);
                guard.last_used = Instant::now();
                Ok(PooledConn { guard })
            }
            Err(e) => {
                warn!("pool dial failed: {e}");
                Err(DbError::Exhausted)
            }
        }
    }

    /// One sweeper pass: disconnect idle slots, probe the rest.
    ///
    /// Slots whose mutex is held are skipped — they are in use and need no
    /// check.
    pub async fn sweep_once(&self) {
        for (index, slot) in self.slots.iter().enumerate() {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.conn.is_none() {
                continue;
            }

            if guard.last_used.elapsed() > self.idle_timeout {
                if let Some(conn) = guard.conn.take() {
                    info!("pool slot {index} idle, disconnecting");
                    self.driver.close(conn).await;
                }
                continue;
            }

            // The next get() redials a slot whose probe failed.
            if let Some(conn) = guard.conn.as_mut() {
                if let Err(e) = self.driver.ping(conn).await {
                    warn!("pool slot {index} failed probe: {e}");
                    if let Some(conn) = guard.conn.take() {
                        self.driver.close(conn).await;
                    }
                }
            }
        }
    }

    /// Run the sweeper until cancelled, one pass every `period`.
    pub async fn run_sweeper(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep_once().await,
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Disconnect everything that is not currently checked out.
    pub async fn shutdown(&self) {
        for slot in &self.slots {
            if let Ok(mut guard) = slot.try_lock() {
                if let Some(conn) = guard.conn.take() {
                    self.driver.close(conn).await;
                }
            }
        }
    }

    /// Number of currently dialed slots, counted without blocking. Slots in
    /// use count as dialed.
    pub fn dialed(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| match slot.try_lock() {
                Ok(guard) => guard.conn.is_some(),
                Err(_) => true,
            })
            .count()
    }
}
