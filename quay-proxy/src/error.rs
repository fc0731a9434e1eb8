use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Proto(#[from] quay_proto::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad route line {line}: {reason}")]
    BadRoute { line: usize, reason: String },

    #[error("duplicate listen port {0} in route table")]
    DuplicateListenPort(u16),

    #[error("control channel lost")]
    ControlLost,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
