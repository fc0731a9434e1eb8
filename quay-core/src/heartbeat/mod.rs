//! The heartbeat registry.
//!
//! A keeper daemon owns a fixed-capacity slot table mapping pid →
//! {name, timeout, last beat}. Workers talk to it over a Unix-domain socket
//! with framed tag payloads: `register` on startup, `beat` at their loop
//! points, `unregister` on graceful exit. The keeper's reaper pass scans
//! the table every 10 seconds and escalates on processes whose beat has
//! gone stale: zero-signal probe, SIGTERM, up to five 1-second polls, then
//! SIGKILL, and the slot is cleared either way.

pub mod client;
pub mod keeper;
pub mod registry;

pub use client::Heartbeat;
pub use keeper::Keeper;
pub use registry::{Registry, RegistryError, SlotRecord, MAX_NAME_LEN, REGISTRY_CAPACITY};
