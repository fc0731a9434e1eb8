//! The reverse-proxy pair.
//!
//! The **relay** lives in the outer zone. It owns the route table, accepts
//! external clients on the routes' listen ports, and multiplexes demand
//! over one persistent framed control channel that the inner-zone
//! **dialer** pre-dialed to it — the inner network never accepts an inbound
//! connection. For each external client the relay asks the dialer for a
//! matching outbound pair and splices the two sockets byte-for-byte.
//!
//! Both processes run a single-threaded cooperative runtime; a 20-second
//! tick drives control-channel heartbeats and the 80-second idle sweep of
//! the pair table.

pub mod dialer;
pub mod error;
pub mod pair;
pub mod relay;
pub mod route;

pub use dialer::Dialer;
pub use error::ProxyError;
pub use pair::{PairTable, MAX_PAIRED_SOCKETS};
pub use relay::Relay;
pub use route::{load_routes, parse_routes, Route};

/// Period of the heartbeat / idle-sweep tick in both processes.
pub const TICK_SECS: u64 = 20;

/// A pair is closed once it has moved nothing for this long.
pub const IDLE_CLOSE_SECS: i64 = 80;
