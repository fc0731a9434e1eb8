//! Table synchronization workers.
//!
//! [`incremental`] pulls new rows from a remote table into a local table,
//! driven by a watermark: each cycle reads `max(local_key)` locally and
//! fetches remote rows strictly above it in key order, batching inserts.
//! Two variants exist — row-copy (values travel through this process) and
//! federated (only keys travel; the insert is a server-side
//! `INSERT … SELECT` through a federated table).
//!
//! [`refresh`] re-synchronizes a configured slice wholesale: delete, then
//! re-insert through the federated table, either in one transaction or in
//! key batches.

pub mod config;
pub mod error;
pub mod incremental;
pub mod refresh;
pub mod sql;

pub use config::{RefreshConfig, RefreshMode, SyncConfig};
pub use error::SyncError;
pub use incremental::IncrementalSync;
pub use refresh::RefreshSync;
