//! Length-prefixed message framing.
//!
//! Every control message travels as a 4-byte big-endian payload length
//! followed by exactly that many payload bytes. File bodies are NOT framed:
//! they stream raw on the same connection after an announce frame, and the
//! transfer code reaches the underlying stream through
//! [`FramedStream::get_mut`].

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{ProtoError, Result};

/// Heartbeat payload exchanged on idle sessions and control channels.
pub const ACTIVETEST: &str = "<activetest>ok</activetest>";

/// Reply to a heartbeat.
pub const ACTIVETEST_REPLY: &str = "ok";

/// Upper bound on a single frame. Control messages are small; anything
/// larger is a protocol violation, not a big message.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Receive deadline for [`FramedStream::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Block until a frame arrives or the peer closes.
    Block,
    /// Wait up to this many seconds for the frame to begin arriving.
    Secs(u64),
    /// Return `Timeout` immediately unless a frame is already buffered.
    PollOnce,
}

/// A framed view over an async byte stream.
///
/// `recv` is cancel-safe: header and body bytes consumed by a receive that
/// timed out or was dropped mid-frame are retained, and a later `recv`
/// resumes the same frame instead of desynchronizing. The proxy control
/// channels rely on this — their receive races a timer in a `select!`.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    header: [u8; 4],
    header_filled: usize,
    /// In-flight frame body: the buffer and how much of it is filled.
    body: Option<(Vec<u8>, usize)>,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            header: [0; 4],
            header_filled: 0,
            body: None,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Access the raw stream, e.g. to move unframed file-body bytes.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Send one frame: length prefix, then the payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtoError::Malformed(format!(
                "frame of {} bytes exceeds the {MAX_FRAME_LEN}-byte limit",
                payload.len()
            )));
        }
        let len = (payload.len() as u32).to_be_bytes();
        self.stream.write_all(&len).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_str(&mut self, payload: &str) -> Result<()> {
        self.send(payload.as_bytes()).await
    }

    /// Receive one frame under the given deadline.
    ///
    /// The deadline covers the arrival of the frame header; once a frame has
    /// begun, its body is read to completion. A clean close before any
    /// header byte is `PeerClosed`; a close mid-frame is `Malformed`.
    pub async fn recv(&mut self, deadline: RecvTimeout) -> Result<Vec<u8>> {
        if self.body.is_none() {
            let len = match deadline {
                RecvTimeout::Block => self.fill_header().await?,
                RecvTimeout::Secs(secs) => {
                    match timeout(Duration::from_secs(secs), self.fill_header()).await {
                        Ok(res) => res?,
                        Err(_) => return Err(ProtoError::Timeout),
                    }
                }
                RecvTimeout::PollOnce => match timeout(Duration::ZERO, self.fill_header()).await {
                    Ok(res) => res?,
                    Err(_) => return Err(ProtoError::Timeout),
                },
            };

            let len = len as usize;
            if len > MAX_FRAME_LEN {
                return Err(ProtoError::Malformed(format!(
                    "peer announced a {len}-byte frame, limit is {MAX_FRAME_LEN}"
                )));
            }
            self.body = Some((vec![0u8; len], 0));
        }

        self.fill_body().await?;
        Ok(self.body.take().map(|(buf, _)| buf).unwrap_or_default())
    }

    /// Receive one frame and require UTF-8.
    pub async fn recv_str(&mut self, deadline: RecvTimeout) -> Result<String> {
        let payload = self.recv(deadline).await?;
        String::from_utf8(payload)
            .map_err(|_| ProtoError::Malformed("frame payload is not UTF-8".into()))
    }

    /// Send a heartbeat and require the `ok` reply within `reply_secs`.
    pub async fn heartbeat(&mut self, reply_secs: u64) -> Result<()> {
        self.send_str(ACTIVETEST).await?;
        let reply = self.recv_str(RecvTimeout::Secs(reply_secs)).await?;
        if reply != ACTIVETEST_REPLY {
            return Err(ProtoError::Malformed(format!(
                "unexpected heartbeat reply {reply:?}"
            )));
        }
        Ok(())
    }

    /// Accumulate the in-flight body across cancellations.
    async fn fill_body(&mut self) -> Result<()> {
        let Self { stream, body, .. } = self;
        let Some((buf, filled)) = body.as_mut() else {
            return Ok(());
        };
        while *filled < buf.len() {
            let n = stream.read(&mut buf[*filled..]).await?;
            if n == 0 {
                return Err(ProtoError::Malformed(
                    "peer closed inside a frame body".into(),
                ));
            }
            *filled += n;
        }
        Ok(())
    }

    /// Accumulate the 4-byte header across cancellations.
    async fn fill_header(&mut self) -> Result<u32> {
        while self.header_filled < 4 {
            let n = self
                .stream
                .read(&mut self.header[self.header_filled..])
                .await?;
            if n == 0 {
                return Err(if self.header_filled == 0 {
                    ProtoError::PeerClosed
                } else {
                    ProtoError::Malformed("peer closed inside a frame header".into())
                });
            }
            self.header_filled += n;
        }
        self.header_filled = 0;
        Ok(u32::from_be_bytes(self.header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trip() {
        let (a, b) = duplex(256);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        tx.send_str("<op>beat</op>").await.unwrap();
        let got = rx.recv_str(RecvTimeout::Block).await.unwrap();
        assert_eq!(got, "<op>beat</op>");
    }

    #[tokio::test]
    async fn empty_frame_is_legal() {
        let (a, b) = duplex(64);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        tx.send(b"").await.unwrap();
        let got = rx.recv(RecvTimeout::Block).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn timeout_reported_when_nothing_arrives() {
        let (a, _keep_open) = duplex(64);
        let mut rx = FramedStream::new(a);
        let err = rx.recv(RecvTimeout::Secs(0)).await.unwrap_err();
        assert!(matches!(err, ProtoError::Timeout));
    }

    #[tokio::test]
    async fn poll_once_sees_buffered_frame() {
        let (a, b) = duplex(256);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        // Nothing buffered yet.
        assert!(matches!(
            rx.recv(RecvTimeout::PollOnce).await,
            Err(ProtoError::Timeout)
        ));

        tx.send_str("x").await.unwrap();
        let got = rx.recv_str(RecvTimeout::PollOnce).await.unwrap();
        assert_eq!(got, "x");
    }

    #[tokio::test]
    async fn clean_close_is_peer_closed() {
        let (a, b) = duplex(64);
        drop(b);
        let mut rx = FramedStream::new(a);
        assert!(matches!(
            rx.recv(RecvTimeout::Block).await,
            Err(ProtoError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn close_inside_body_is_malformed() {
        let (a, b) = duplex(64);
        let mut rx = FramedStream::new(b);
        {
            use tokio::io::AsyncWriteExt;
            let mut raw = a;
            // Announce 10 bytes, deliver 3, then close.
            raw.write_all(&10u32.to_be_bytes()).await.unwrap();
            raw.write_all(b"abc").await.unwrap();
        }
        assert!(matches!(
            rx.recv(RecvTimeout::Block).await,
            Err(ProtoError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn interrupted_recv_resumes_the_same_frame() {
        let (mut raw, b) = duplex(256);
        let mut rx = FramedStream::new(b);

        use tokio::io::AsyncWriteExt;
        raw.write_all(&5u32.to_be_bytes()).await.unwrap();
        raw.write_all(b"he").await.unwrap();

        // The receive is dropped mid-body, as a select! against a timer
        // would drop it.
        let partial =
            tokio::time::timeout(Duration::from_millis(20), rx.recv(RecvTimeout::Block)).await;
        assert!(partial.is_err());

        raw.write_all(b"llo").await.unwrap();
        let got = rx.recv_str(RecvTimeout::Block).await.unwrap();
        assert_eq!(got, "hello");
    }

    #[tokio::test]
    async fn heartbeat_round_trip() {
        let (a, b) = duplex(256);
        let mut client = FramedStream::new(a);
        let mut server = FramedStream::new(b);

        let server_task = tokio::spawn(async move {
            let msg = server.recv_str(RecvTimeout::Secs(5)).await.unwrap();
            assert_eq!(msg, ACTIVETEST);
            server.send_str(ACTIVETEST_REPLY).await.unwrap();
        });

        client.heartbeat(5).await.unwrap();
        server_task.await.unwrap();
    }
}
