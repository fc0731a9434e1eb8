//! The driver contract the pool consumes.
//!
//! The pool does not care what a connection is; it needs to dial one, probe
//! it, and hang it up. Production uses [`MySqlDriver`]; tests script a fake.

use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Connection, MySqlConnection};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Every pool slot is in use (or the fallback dial failed).
    #[error("connection pool exhausted")]
    Exhausted,

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Dial, probe, and hang up connections on behalf of the pool.
#[async_trait]
pub trait DbDriver: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn connect(&self) -> Result<Self::Conn>;

    /// Lightweight liveness probe on an idle connection.
    async fn ping(&self, conn: &mut Self::Conn) -> Result<()>;

    async fn close(&self, conn: Self::Conn);
}

/// The production driver over a single sqlx MySQL connection.
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    options: MySqlConnectOptions,
}

impl MySqlDriver {
    pub fn new(options: MySqlConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl DbDriver for MySqlDriver {
    type Conn = MySqlConnection;

    async fn connect(&self) -> Result<MySqlConnection> {
        Ok(MySqlConnection::connect_with(&self.options).await?)
    }

    async fn ping(&self, conn: &mut MySqlConnection) -> Result<()> {
        Ok(conn.ping().await?)
    }

    async fn close(&self, conn: MySqlConnection) {
        let _ = conn.close().await;
    }
}
