//! Wire primitives shared by every Quay daemon.
//!
//! Three layers live here:
//!
//! - [`tags`]: the `<key>value</key>` tagged-attribute codec used for CLI
//!   parameter buffers and control-message payloads.
//! - [`frame`]: 4-byte big-endian length-prefixed framing over any async
//!   stream, with blocking, deadline, and poll-once receive modes.
//! - [`wire`]: the typed control messages (login, file announce, file ack,
//!   proxy dial request) that ride inside frames.

pub mod error;
pub mod frame;
pub mod tags;
pub mod wire;

pub use error::ProtoError;
pub use frame::{FramedStream, RecvTimeout, ACTIVETEST, ACTIVETEST_REPLY, MAX_FRAME_LEN};
pub use tags::{TagBuffer, TagWriter};
pub use wire::{
    is_activetest, FileAck, FileAnnounce, LoginRequest, PostTransferPolicy, ProxyDial, SessionKind,
};
