//! The pair table and the splice loop.
//!
//! Every proxied connection is two sockets spliced together. The table is
//! the authoritative bidirectional map `id → peer` plus a shared activity
//! stamp per pair; relay and dialer each own one. Registration and removal
//! of both directions happen under a single lock acquisition, so the
//! `peer(peer(x)) = x` invariant holds at every observable instant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cap on live paired sockets per process.
pub const MAX_PAIRED_SOCKETS: usize = 1024;

/// Splice read size.
const SPLICE_CHUNK: usize = 5000;

pub type ConnId = u64;

#[derive(Debug)]
struct PairEntry {
    peer: ConnId,
    last_active: Arc<AtomicI64>,
    cancel: CancellationToken,
}

/// Shared state of all live pairs in one proxy process.
#[derive(Debug)]
pub struct PairTable {
    entries: Mutex<HashMap<ConnId, PairEntry>>,
    next_id: AtomicU64,
    max_sockets: usize,
}

/// What a splice task holds onto while it runs.
#[derive(Debug, Clone)]
pub struct PairGuard {
    pub id: ConnId,
    pub peer: ConnId,
    table: Arc<PairTable>,
    last_active: Arc<AtomicI64>,
    cancel: CancellationToken,
}

impl PairTable {
    pub fn new() -> Self {
        Self::with_max_sockets(MAX_PAIRED_SOCKETS)
    }

    pub fn with_max_sockets(max_sockets: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_sockets,
        }
    }

    /// Register a new pair. `None` when the socket cap would be exceeded;
    /// the caller closes the sockets and logs.
    pub fn register(self: &Arc<Self>) -> Option<PairGuard> {
        let a = self.next_id.fetch_add(1, Ordering::Relaxed);
        let b = self.next_id.fetch_add(1, Ordering::Relaxed);
        let last_active = Arc::new(AtomicI64::new(now_epoch()));
        let cancel = CancellationToken::new();

        let mut entries = self.entries.lock().expect("pair table lock");
        if entries.len() + 2 > self.max_sockets {
            return None;
        }
        entries.insert(
            a,
            PairEntry {
                peer: b,
                last_active: last_active.clone(),
                cancel: cancel.clone(),
            },
        );
        entries.insert(
            b,
            PairEntry {
                peer: a,
                last_active: last_active.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(entries);

        Some(PairGuard {
            id: a,
            peer: b,
            table: self.clone(),
            last_active,
            cancel,
        })
    }

    /// Remove both directions of the pair containing `id`.
    pub fn remove_pair(&self, id: ConnId) {
        let mut entries = self.entries.lock().expect("pair table lock");
        if let Some(entry) = entries.remove(&id) {
            entries.remove(&entry.peer);
        }
    }

    /// Cancel every pair idle longer than `max_idle_secs`. The splice tasks
    /// do the actual closing and removal.
    pub fn sweep_idle(&self, max_idle_secs: i64) {
        let now = now_epoch();
        let entries = self.entries.lock().expect("pair table lock");
        for (id, entry) in entries.iter() {
            if now - entry.last_active.load(Ordering::Relaxed) > max_idle_secs
                && !entry.cancel.is_cancelled()
            {
                info!("pair {id}<->{} idle, closing", entry.peer);
                entry.cancel.cancel();
            }
        }
    }

    /// Cancel everything.
    pub fn close_all(&self) {
        let entries = self.entries.lock().expect("pair table lock");
        for entry in entries.values() {
            entry.cancel.cancel();
        }
    }

    /// Live socket count (twice the pair count).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("pair table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The peer of `id`, if the pair is live.
    pub fn peer_of(&self, id: ConnId) -> Option<ConnId> {
        self.entries
            .lock()
            .expect("pair table lock")
            .get(&id)
            .map(|entry| entry.peer)
    }
}

impl Default for PairTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PairGuard {
    pub fn touch(&self) {
        self.last_active.store(now_epoch(), Ordering::Relaxed);
    }
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Move bytes between the two halves of a pair until either closes, either
/// errors, or the pair is cancelled. Clears the pair table on the way out;
/// the sockets close when they drop.
pub async fn splice(a: TcpStream, b: TcpStream, guard: PairGuard) {
    let (mut a_read, mut a_write) = a.into_split();
    let (mut b_read, mut b_write) = b.into_split();
    let mut buf_ab = vec![0u8; SPLICE_CHUNK];
    let mut buf_ba = vec![0u8; SPLICE_CHUNK];

    loop {
        tokio::select! {
            _ = guard.cancel.cancelled() => break,
            read = a_read.read(&mut buf_ab) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if b_write.write_all(&buf_ab[..n]).await.is_err() {
                        break;
                    }
                    guard.touch();
                }
            },
            read = b_read.read(&mut buf_ba) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if a_write.write_all(&buf_ba[..n]).await.is_err() {
                        break;
                    }
                    guard.touch();
                }
            },
        }
    }

    guard.table.remove_pair(guard.id);
}

/// Register and splice, or close both sockets when the table is full.
pub fn spawn_pair(table: &Arc<PairTable>, a: TcpStream, b: TcpStream) -> bool {
    match table.register() {
        Some(guard) => {
            info!("pair {}<->{} established", guard.id, guard.peer);
            tokio::spawn(splice(a, b, guard));
            true
        }
        None => {
            warn!("paired socket cap reached, refusing new connection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_map_is_symmetric_and_cleared_atomically() {
        let table = Arc::new(PairTable::new());
        let guard = table.register().unwrap();

        assert_eq!(table.peer_of(guard.id), Some(guard.peer));
        assert_eq!(table.peer_of(guard.peer), Some(guard.id));
        assert_eq!(table.len(), 2);

        table.remove_pair(guard.peer);
        assert_eq!(table.len(), 0);
        assert_eq!(table.peer_of(guard.id), None);
        assert_eq!(table.peer_of(guard.peer), None);
    }

    #[test]
    fn cap_refuses_registration() {
        let table = Arc::new(PairTable::with_max_sockets(2));
        let _first = table.register().unwrap();
        assert!(table.register().is_none());
    }

    #[test]
    fn idle_sweep_cancels_only_stale_pairs() {
        let table = Arc::new(PairTable::new());
        let stale = table.register().unwrap();
        let fresh = table.register().unwrap();

        stale
            .last_active
            .store(now_epoch() - 100, Ordering::Relaxed);

        table.sweep_idle(80);
        assert!(stale.cancel.is_cancelled());
        assert!(!fresh.cancel.is_cancelled());
    }
}
