use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Db(#[from] quay_core::db::DbError),

    #[error("bad parameter buffer: {0}")]
    Params(#[from] quay_proto::ProtoError),

    #[error(transparent)]
    ConnStr(#[from] quay_core::config::ConfigError),

    #[error("bad configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
