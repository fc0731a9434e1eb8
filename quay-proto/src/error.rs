use thiserror::Error;

/// Errors surfaced by the wire layer.
///
/// Session-level callers treat `Timeout` and `PeerClosed` as the end of the
/// session; `Malformed` additionally gets logged before the close.
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read timed out")]
    Timeout,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl ProtoError {
    /// True when the error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtoError::PeerClosed | ProtoError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ProtoError>;
