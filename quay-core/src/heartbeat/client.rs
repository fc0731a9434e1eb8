//! The worker-side heartbeat handle.

use std::path::Path;

use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::warn;

use quay_proto::{FramedStream, RecvTimeout, TagBuffer, TagWriter};

use super::registry::RegistryError;

/// How long to wait for a keeper reply before giving up on the op.
const REPLY_SECS: u64 = 5;

/// A registered worker's channel to the keeper.
///
/// Workers without a configured keeper socket get the
/// [`disabled`](Heartbeat::disabled) handle; its operations are no-ops, so
/// call sites stay unconditional. A beat that fails after registration is logged and
/// swallowed — the worker keeps doing its job, and the reaper will judge
/// it by its last successful beat.
#[derive(Debug)]
pub struct Heartbeat {
    channel: Option<Mutex<FramedStream<UnixStream>>>,
    pid: u32,
}

impl Heartbeat {
    /// The no-op handle.
    pub fn disabled() -> Self {
        Self {
            channel: None,
            pid: std::process::id(),
        }
    }

    /// Connect to the keeper and register this process.
    pub async fn register(
        socket: &Path,
        name: &str,
        timeout_secs: u64,
    ) -> Result<Self, RegistryError> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(quay_proto::ProtoError::Io)?;
        let handle = Self {
            channel: Some(Mutex::new(FramedStream::new(stream))),
            pid: std::process::id(),
        };
        handle.register_as(name, timeout_secs).await?;
        Ok(handle)
    }

    /// (Re-)register under a new name/timeout on the existing channel. The
    /// keeper reuses this pid's slot.
    pub async fn register_as(&self, name: &str, timeout_secs: u64) -> Result<(), RegistryError> {
        let Some(channel) = &self.channel else {
            return Ok(());
        };
        let request = TagWriter::new()
            .tag("op", "register")
            .tag("pid", self.pid)
            .tag("name", name)
            .tag("timeout", timeout_secs)
            .finish();

        let mut framed = channel.lock().await;
        framed.send_str(&request).await?;
        let reply = framed.recv_str(RecvTimeout::Secs(REPLY_SECS)).await?;

        match TagBuffer::new(&reply).get("result") {
            Some("ok") => Ok(()),
            Some("full") => Err(RegistryError::Full),
            other => Err(RegistryError::Refused(format!(
                "unexpected register reply: {other:?}"
            ))),
        }
    }

    /// Stamp this worker's beat. Failures are logged, not returned.
    pub async fn beat(&self) {
        if let Err(e) = self.op("beat").await {
            warn!("heartbeat lost: {e}");
        }
    }

    /// Clear this worker's slot on graceful exit.
    pub async fn unregister(&self) {
        if let Err(e) = self.op("unregister").await {
            warn!("heartbeat unregister failed: {e}");
        }
    }

    async fn op(&self, op: &str) -> Result<(), RegistryError> {
        let Some(channel) = &self.channel else {
            return Ok(());
        };
        let request = TagWriter::new()
            .tag("op", op)
            .tag("pid", self.pid)
            .finish();

        let mut framed = channel.lock().await;
        framed.send_str(&request).await?;
        framed.recv_str(RecvTimeout::Secs(REPLY_SECS)).await?;
        Ok(())
    }
}
