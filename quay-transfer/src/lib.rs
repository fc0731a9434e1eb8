//! File-transfer endpoints.
//!
//! One TCP service moves files in both directions. A client logs in as a
//! pusher (it scans its own outbox and streams files up) or a puller (the
//! server scans its inbox and streams files down). Either way the moving
//! side announces each file with a framed control message, streams the raw
//! body, and waits for a framed ack; the receiving side lands bytes in a
//! `.tmp` sibling, restores the announced mtime, and renames into place.
//! Sessions idle between scans exchange heartbeats.

pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod walker;

pub use client::{run_pull_client, run_push_client};
pub use config::{ClientConfig, ServerConfig};
pub use error::TransferError;
pub use server::TransferServer;
pub use session::{
    run_receiver, run_sender, send_cycle, translate_prefix, RecvOptions, SendOptions,
};
pub use walker::{scan, FileEntry, MatchRules, SCAN_LIMIT};
