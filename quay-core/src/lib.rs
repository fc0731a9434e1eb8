//! Core library for the Quay daemons.
//!
//! Everything a worker needs before it does its actual job lives here: the
//! `program <logfile> <paramxml>` CLI convention and typed configuration
//! parsing, the tracing bootstrap, the hand-built database connection pool
//! with its minimal driver contract, and the heartbeat registry (keeper
//! daemon + client handle) that polices every long-running process.

pub mod config;
pub mod db;
pub mod heartbeat;
pub mod logging;

pub use config::{ConnStr, WorkerArgs};
pub use db::{column_text, DbDriver, DbError, MySqlDriver, Pool, PoolConfig, PooledConn};
pub use heartbeat::{Heartbeat, Keeper, Registry, RegistryError, SlotRecord, REGISTRY_CAPACITY};
