//! Typed control messages.
//!
//! Each message is one frame whose payload is a tag buffer. Senders build
//! the payload with [`TagWriter`]; receivers decode through [`TagBuffer`]
//! and ignore tags they do not know, so the login payload may carry the
//! whole CLI parameter buffer of the client.

use chrono::NaiveDateTime;

use crate::error::{ProtoError, Result};
use crate::frame::ACTIVETEST;
use crate::tags::{TagBuffer, TagWriter};

/// Wire form of file modification times.
pub const MTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the client intends to do with the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// The client sends files to the server.
    Push,
    /// The client fetches files from the server.
    Pull,
}

impl SessionKind {
    pub fn code(self) -> u8 {
        match self {
            SessionKind::Push => 1,
            SessionKind::Pull => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(SessionKind::Push),
            2 => Ok(SessionKind::Pull),
            other => Err(ProtoError::Malformed(format!(
                "clienttype not in (1,2): {other}"
            ))),
        }
    }
}

/// What the sender does with a file once the receiver has acked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTransferPolicy {
    /// Remove the source file.
    Delete,
    /// Move the source file under the backup root, keeping its relative path.
    MoveToBackup,
}

impl PostTransferPolicy {
    pub fn code(self) -> u8 {
        match self {
            PostTransferPolicy::Delete => 1,
            PostTransferPolicy::MoveToBackup => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(PostTransferPolicy::Delete),
            2 => Ok(PostTransferPolicy::MoveToBackup),
            other => Err(ProtoError::Malformed(format!("ptype not in (1,2): {other}"))),
        }
    }
}

/// The first message of a transfer session, client → server.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub kind: SessionKind,
    pub policy: PostTransferPolicy,
    pub client_path: String,
    pub client_path_bak: Option<String>,
    pub srv_path: String,
    pub srv_path_bak: Option<String>,
    pub and_child: bool,
    pub match_name: String,
    pub timetvl: u64,
    pub timeout: u64,
    pub pname: String,
}

impl LoginRequest {
    pub fn encode(&self) -> String {
        TagWriter::new()
            .tag("clienttype", self.kind.code())
            .tag("ptype", self.policy.code())
            .tag("clientpath", &self.client_path)
            .opt_tag("clientpathbak", self.client_path_bak.as_ref())
            .tag("srvpath", &self.srv_path)
            .opt_tag("srvpathbak", self.srv_path_bak.as_ref())
            .tag("andchild", self.and_child)
            .tag("matchname", &self.match_name)
            .tag("timetvl", self.timetvl)
            .tag("timeout", self.timeout)
            .tag("pname", &self.pname)
            .finish()
    }

    pub fn decode(payload: &str) -> Result<Self> {
        let tags = TagBuffer::new(payload);
        let kind = SessionKind::from_code(tags.require_parse::<u8>("clienttype")?)?;
        let policy = PostTransferPolicy::from_code(tags.require_parse::<u8>("ptype")?)?;

        // The same clamps every worker applies when it parses its own
        // parameter buffer; the server re-applies them because it trusts
        // nobody about its read deadlines.
        let timetvl = tags.require_parse::<u64>("timetvl")?.min(30);
        let timeout = tags.require_parse::<u64>("timeout")?.max(50);

        Ok(Self {
            kind,
            policy,
            client_path: tags.require("clientpath")?.to_string(),
            client_path_bak: tags.get("clientpathbak").map(str::to_string),
            srv_path: tags.require("srvpath")?.to_string(),
            srv_path_bak: tags.get("srvpathbak").map(str::to_string),
            and_child: tags.get_bool("andchild"),
            match_name: tags.require("matchname")?.to_string(),
            timetvl,
            timeout,
            pname: tags.require("pname")?.to_string(),
        })
    }
}

/// Pre-announcement of a raw file body, sender → receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnnounce {
    /// The sender's full path for the file; the receiver translates the
    /// root prefix to derive its own target path.
    pub filename: String,
    pub mtime: NaiveDateTime,
    pub size: u64,
}

impl FileAnnounce {
    pub fn encode(&self) -> String {
        TagWriter::new()
            .tag("filename", &self.filename)
            .tag("mtime", self.mtime.format(MTIME_FORMAT))
            .tag("size", self.size)
            .finish()
    }

    pub fn decode(payload: &str) -> Result<Self> {
        let tags = TagBuffer::new(payload);
        let raw_mtime = tags.require("mtime")?;
        let mtime = NaiveDateTime::parse_from_str(raw_mtime, MTIME_FORMAT)
            .map_err(|_| ProtoError::Malformed(format!("bad mtime {raw_mtime:?}")))?;
        Ok(Self {
            filename: tags.require("filename")?.to_string(),
            mtime,
            size: tags.require_parse("size")?,
        })
    }

    /// Announces are recognized by their leading tag, everything else on an
    /// idle session is a heartbeat or noise.
    pub fn is_announce(payload: &str) -> bool {
        payload.starts_with("<filename>")
    }
}

/// Per-file receipt, receiver → sender. Carries the *sender's* filename
/// unchanged so the sender can apply its post-transfer policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAck {
    pub filename: String,
    pub ok: bool,
}

impl FileAck {
    pub fn encode(&self) -> String {
        TagWriter::new()
            .tag("filename", &self.filename)
            .tag("result", if self.ok { "ok" } else { "failed" })
            .finish()
    }

    pub fn decode(payload: &str) -> Result<Self> {
        let tags = TagBuffer::new(payload);
        Ok(Self {
            filename: tags.require("filename")?.to_string(),
            ok: tags.require("result")? == "ok",
        })
    }
}

/// Relay → dialer request to open a pair toward an inner destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDial {
    pub dst_ip: String,
    pub dst_port: u16,
}

impl ProxyDial {
    pub fn encode(&self) -> String {
        TagWriter::new()
            .tag("dstip", &self.dst_ip)
            .tag("dstport", self.dst_port)
            .finish()
    }

    pub fn decode(payload: &str) -> Result<Self> {
        let tags = TagBuffer::new(payload);
        Ok(Self {
            dst_ip: tags.require("dstip")?.to_string(),
            dst_port: tags.require_parse("dstport")?,
        })
    }
}

/// True when the payload is the heartbeat literal.
pub fn is_activetest(payload: &str) -> bool {
    payload == ACTIVETEST
}
