use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Proto(#[from] quay_proto::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad matchname {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("login refused by server")]
    LoginRefused,

    #[error("heartbeat registration failed: {0}")]
    Registry(#[from] quay_core::heartbeat::RegistryError),
}

pub type Result<T> = std::result::Result<T, TransferError>;
