//! The keeper daemon: owns the registry, serves the Unix socket, reaps.

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quay_proto::{FramedStream, ProtoError, RecvTimeout, TagBuffer, TagWriter};

use super::registry::{Registry, SlotRecord};

/// Period of the reaper pass.
pub const REAP_PERIOD: Duration = Duration::from_secs(10);

/// How many 1-second polls to give a SIGTERM'd process before SIGKILL.
const TERM_GRACE_POLLS: u32 = 5;

#[derive(Debug)]
pub struct Keeper {
    registry: Arc<Mutex<Registry>>,
}

impl Keeper {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
        }
    }

    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        self.registry.clone()
    }

    /// Accept loop. One task per client connection; clients keep their
    /// connection open and send framed ops on it for their whole life.
    pub async fn serve(&self, listener: UnixListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let registry = self.registry.clone();
                            tokio::spawn(handle_client(registry, stream));
                        }
                        Err(e) => {
                            warn!("keeper accept failed: {e}");
                        }
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Run the reaper until cancelled.
    pub async fn run_reaper(&self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(REAP_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => self.reap_once().await,
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One reaper pass.
    ///
    /// Slots whose process is gone are cleared immediately. Slots whose
    /// beat is stale get the escalation treatment outside the registry
    /// lock, then their slot is cleared.
    pub async fn reap_once(&self) {
        let now = chrono::Utc::now().timestamp();

        let stale: Vec<(usize, SlotRecord)> = {
            let mut registry = self.registry.lock().await;
            let mut stale = Vec::new();
            for (index, record) in registry.entries() {
                if !process_alive(record.pid) {
                    info!(
                        "process pid={} ({}) no longer exists, clearing slot {index}",
                        record.pid, record.name
                    );
                    registry.clear_slot(index);
                } else if now - record.last_beat > record.timeout_secs as i64 {
                    stale.push((index, record));
                }
            }
            stale
        };

        for (index, record) in stale {
            warn!(
                "process pid={} ({}) timed out ({}s since last beat)",
                record.pid,
                record.name,
                now - record.last_beat
            );
            terminate(record.pid, &record.name).await;

            let mut registry = self.registry.lock().await;
            if registry.find(record.pid) == Some(index) {
                registry.clear_slot(index);
            }
        }
    }
}

async fn handle_client(registry: Arc<Mutex<Registry>>, stream: UnixStream) {
    let mut framed = FramedStream::new(stream);
    loop {
        let payload = match framed.recv_str(RecvTimeout::Block).await {
            Ok(payload) => payload,
            Err(ProtoError::PeerClosed) => return,
            Err(e) => {
                warn!("keeper client error: {e}");
                return;
            }
        };

        let reply = dispatch(&registry, &payload).await;
        if framed.send_str(&reply).await.is_err() {
            return;
        }
    }
}

async fn dispatch(registry: &Mutex<Registry>, payload: &str) -> String {
    let tags = TagBuffer::new(payload);
    let now = chrono::Utc::now().timestamp();

    let result: Result<String, String> = async {
        let op = tags.get("op").ok_or("missing op")?;
        let pid: u32 = tags
            .get_parse("pid")
            .map_err(|e| e.to_string())?
            .ok_or("missing pid")?;

        match op {
            "register" => {
                let name = tags.get("name").ok_or("missing name")?;
                let timeout: u64 = tags
                    .get_parse("timeout")
                    .map_err(|e| e.to_string())?
                    .ok_or("missing timeout")?;
                let mut registry = registry.lock().await;
                match registry.register(pid, name, timeout, now) {
                    Ok(slot) => {
                        info!("registered pid={pid} ({name}) in slot {slot}");
                        Ok(TagWriter::new()
                            .tag("result", "ok")
                            .tag("slot", slot)
                            .finish())
                    }
                    Err(_) => Ok(TagWriter::new().tag("result", "full").finish()),
                }
            }
            "beat" => {
                registry.lock().await.beat(pid, now);
                Ok(TagWriter::new().tag("result", "ok").finish())
            }
            "unregister" => {
                registry.lock().await.unregister(pid);
                info!("unregistered pid={pid}");
                Ok(TagWriter::new().tag("result", "ok").finish())
            }
            other => Err(format!("unknown op {other:?}")),
        }
    }
    .await;

    match result {
        Ok(reply) => reply,
        Err(message) => TagWriter::new()
            .tag("result", "error")
            .tag("message", message)
            .finish(),
    }
}

/// Zero-signal probe.
fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_register_reports_slot_or_full() {
        let registry = Mutex::new(Registry::with_capacity(1));

        let reply = dispatch(
            &registry,
            "<op>register</op><pid>41</pid><name>w1</name><timeout>30</timeout>",
        )
        .await;
        assert_eq!(reply, "<result>ok</result><slot>0</slot>");

        let reply = dispatch(
            &registry,
            "<op>register</op><pid>42</pid><name>w2</name><timeout>30</timeout>",
        )
        .await;
        assert_eq!(reply, "<result>full</result>");
    }

    #[tokio::test]
    async fn dispatch_beat_and_unregister() {
        let registry = Mutex::new(Registry::with_capacity(4));
        dispatch(
            &registry,
            "<op>register</op><pid>7</pid><name>w</name><timeout>30</timeout>",
        )
        .await;

        assert_eq!(
            dispatch(&registry, "<op>beat</op><pid>7</pid>").await,
            "<result>ok</result>"
        );
        assert_eq!(
            dispatch(&registry, "<op>unregister</op><pid>7</pid>").await,
            "<result>ok</result>"
        );
        assert_eq!(registry.lock().await.occupied(), 0);
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_ops() {
        let registry = Mutex::new(Registry::with_capacity(1));
        let reply = dispatch(&registry, "<op>selfdestruct</op><pid>1</pid>").await;
        assert!(reply.starts_with("<result>error</result>"));
    }
}

/// SIGTERM, up to five 1-second polls, then SIGKILL.
async fn terminate(pid: u32, name: &str) {
    let target = Pid::from_raw(pid as i32);
    let _ = kill(target, Signal::SIGTERM);

    for _ in 0..TERM_GRACE_POLLS {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if !process_alive(pid) {
            info!("process pid={pid} ({name}) exited after SIGTERM");
            return;
        }
    }

    let _ = kill(target, Signal::SIGKILL);
    warn!("process pid={pid} ({name}) was killed");
}
