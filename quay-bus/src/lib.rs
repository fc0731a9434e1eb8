//! The HTTP data-service bus.
//!
//! One accept loop feeds a bounded socket queue; a fixed pool of worker
//! tasks drains it, each running the request pipeline: parse the GET,
//! check credentials and per-interface authorization against the control
//! tables, execute the interface's SQL with positionally bound query-string
//! parameters, and stream the rows as pseudo-XML. A watchdog replaces any
//! worker stuck longer than its threshold, preserving the worker's slot.

pub mod config;
pub mod error;
pub mod http;
pub mod queue;
pub mod registry;
pub mod serve;
pub mod server;
pub mod workers;

pub use config::BusConfig;
pub use error::BusError;
pub use queue::SocketQueue;
pub use registry::InterfaceDef;
pub use serve::{handle_connection, BusState};
pub use server::BusServer;
pub use workers::{ConnHandler, WorkerConfig, WorkerPool};
