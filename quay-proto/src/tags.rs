//! The tagged-attribute codec.
//!
//! Configuration buffers and control payloads are flat sets of
//! `<key>value</key>` tags in any order. Values are opaque text that must not
//! contain `<`; nesting is not part of the format. A buffer is parsed once
//! into a typed struct at the edge (see `quay-core`'s config types and
//! [`crate::wire`]); nothing downstream touches raw tags.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{ProtoError, Result};

/// Borrowed view over a tag buffer with typed accessors.
#[derive(Debug, Clone, Copy)]
pub struct TagBuffer<'a> {
    raw: &'a str,
}

impl<'a> TagBuffer<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// The value of the first `<key>…</key>` occurrence, if present.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        let open = format!("<{key}>");
        let close = format!("</{key}>");
        let start = self.raw.find(&open)? + open.len();
        let rest = &self.raw[start..];
        let end = rest.find(&close)?;
        Some(&rest[..end])
    }

    /// Like [`get`](Self::get), but a missing or empty tag is `Malformed`.
    pub fn require(&self, key: &str) -> Result<&'a str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ProtoError::Malformed(format!("{key} is null"))),
        }
    }

    /// Parse an optional tag. Absent tags yield `None`; unparseable values
    /// are `Malformed`.
    pub fn get_parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ProtoError::Malformed(format!("bad value for {key}: {v:?}"))),
        }
    }

    /// Parse a required tag.
    pub fn require_parse<T: FromStr>(&self, key: &str) -> Result<T> {
        let v = self.require(key)?;
        v.trim()
            .parse::<T>()
            .map_err(|_| ProtoError::Malformed(format!("bad value for {key}: {v:?}")))
    }

    /// Booleans are spelled `true`/`false`; anything else (including an
    /// absent tag) is `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("1"))
    }
}

/// Builder for outgoing tag buffers.
#[derive(Debug, Default)]
pub struct TagWriter {
    buf: String,
}

impl TagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: &str, value: impl Display) -> Self {
        self.push(key, value);
        self
    }

    /// Append the tag only when `value` is `Some`.
    pub fn opt_tag(mut self, key: &str, value: Option<impl Display>) -> Self {
        if let Some(v) = value {
            self.push(key, v);
        }
        self
    }

    fn push(&mut self, key: &str, value: impl Display) {
        use std::fmt::Write;
        // Infallible for String.
        let _ = write!(self.buf, "<{key}>{value}</{key}>");
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_extracts_first_occurrence() {
        let buf = TagBuffer::new("<ip>10.0.0.1</ip><port>5005</port><ip>other</ip>");
        assert_eq!(buf.get("ip"), Some("10.0.0.1"));
        assert_eq!(buf.get("port"), Some("5005"));
        assert_eq!(buf.get("missing"), None);
    }

    #[test]
    fn get_is_not_fooled_by_prefix_keys() {
        let buf = TagBuffer::new("<clientpathbak>/bak</clientpathbak><clientpath>/out</clientpath>");
        assert_eq!(buf.get("clientpath"), Some("/out"));
        assert_eq!(buf.get("clientpathbak"), Some("/bak"));
    }

    #[test]
    fn require_rejects_empty() {
        let buf = TagBuffer::new("<name></name>");
        assert!(buf.require("name").is_err());
        assert!(buf.require("absent").is_err());
    }

    #[test]
    fn typed_accessors() {
        let buf = TagBuffer::new("<port>5005</port><andchild>true</andchild><bad>x9</bad>");
        assert_eq!(buf.require_parse::<u16>("port").unwrap(), 5005);
        assert!(buf.get_bool("andchild"));
        assert!(!buf.get_bool("absent"));
        assert!(buf.get_parse::<u32>("bad").is_err());
        assert_eq!(buf.get_parse::<u32>("absent").unwrap(), None);
    }

    #[test]
    fn writer_round_trip() {
        let out = TagWriter::new()
            .tag("filename", "/out/x.dat")
            .tag("size", 12345)
            .opt_tag("srvpathbak", None::<&str>)
            .finish();
        assert_eq!(out, "<filename>/out/x.dat</filename><size>12345</size>");
        let buf = TagBuffer::new(&out);
        assert_eq!(buf.require_parse::<u64>("size").unwrap(), 12345);
    }
}
