//! The bounded FIFO of accepted sockets between the acceptor and the
//! worker pool.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Default queue bound; beyond it the acceptor sheds load by closing.
pub const QUEUE_CAP: usize = 1024;

#[derive(Debug)]
pub struct SocketQueue {
    inner: Mutex<VecDeque<TcpStream>>,
    notify: Notify,
    cap: usize,
}

impl SocketQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cap,
        }
    }

    /// Enqueue a socket; on overflow the socket is handed back and the
    /// caller drops it.
    pub fn push(&self, stream: TcpStream) -> Result<(), TcpStream> {
        {
            let mut queue = self.inner.lock().expect("socket queue lock");
            if queue.len() >= self.cap {
                return Err(stream);
            }
            queue.push_back(stream);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue one socket, waiting up to `idle_wait`. `None` on timeout —
    /// the worker uses that to refresh its activity stamp. Safe against
    /// spurious wakeups: the queue is re-checked after every notification.
    pub async fn pop(&self, idle_wait: Duration) -> Option<TcpStream> {
        loop {
            {
                let mut queue = self.inner.lock().expect("socket queue lock");
                if let Some(stream) = queue.pop_front() {
                    return Some(stream);
                }
            }
            if tokio::time::timeout(idle_wait, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("socket queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
