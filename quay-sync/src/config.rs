//! Sync worker configuration.

use std::path::PathBuf;

use quay_core::config::ConnStr;
use quay_proto::TagBuffer;

use crate::error::{Result, SyncError};

/// Batch bound for both variants.
pub const MAX_BATCH: usize = 256;

/// Configuration of `quay-syncd`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub local: ConnStr,
    pub remote: ConnStr,
    pub local_table: String,
    pub remote_table: String,
    /// Federated table name; present selects the federated variant.
    pub fed_table: Option<String>,
    /// Select list pulled from the remote table; empty means "fill from
    /// the local table's column list at startup".
    pub remote_cols: Vec<String>,
    /// Columns inserted locally; must pair 1:1 with `remote_cols`.
    pub local_cols: Vec<String>,
    /// AND-suffix appended after the watermark predicate.
    pub where_suffix: String,
    pub remote_key: String,
    pub local_key: String,
    pub maxcount: usize,
    pub timetvl: u64,
    pub timeout: u64,
    pub pname: String,
    pub hb_sock: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_params(params: &str) -> Result<Self> {
        let tags = TagBuffer::new(params);
        let charset = tags.get("charset");

        let maxcount = tags
            .get_parse::<usize>("maxcount")?
            .unwrap_or(MAX_BATCH)
            .clamp(1, MAX_BATCH);

        let timetvl = tags.require_parse::<u64>("timetvl")?.clamp(1, 30);
        let mut timeout = tags.require_parse::<u64>("timeout")?;
        if timeout < timetvl + 10 {
            timeout = timetvl + 10;
        }

        let config = Self {
            local: ConnStr::parse(tags.require("localconnstr")?, charset)?,
            remote: ConnStr::parse(tags.require("remoteconnstr")?, charset)?,
            local_table: tags.require("localtname")?.to_string(),
            remote_table: tags.require("remotetname")?.to_string(),
            fed_table: tags.get("fedtname").filter(|s| !s.is_empty()).map(str::to_string),
            remote_cols: split_cols(tags.get("remotecols")),
            local_cols: split_cols(tags.get("localcols")),
            where_suffix: tags.get("where").unwrap_or("").trim().to_string(),
            remote_key: tags.require("remotekeycol")?.to_string(),
            local_key: tags.require("localkeycol")?.to_string(),
            maxcount,
            timetvl,
            timeout,
            pname: tags.require("pname")?.to_string(),
            hb_sock: tags.get("hbsock").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // Empty lists are filled from the local table's column dictionary
        // at startup; only explicit lists can disagree here.
        if !self.remote_cols.is_empty()
            && !self.local_cols.is_empty()
            && self.remote_cols.len() != self.local_cols.len()
        {
            return Err(SyncError::Config(format!(
                "remotecols has {} names but localcols has {}",
                self.remote_cols.len(),
                self.local_cols.len()
            )));
        }
        if let Some(suffix) = non_and_suffix(&self.where_suffix) {
            return Err(SyncError::Config(format!(
                "where must be an AND-suffix, got {suffix:?}"
            )));
        }
        Ok(())
    }
}

/// How a refresh run replaces its slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// One delete + one insert-select in a single transaction.
    Single,
    /// Key-batched delete/re-insert, committed per batch.
    Batched,
}

/// Configuration of `quay-refreshd`.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub local: ConnStr,
    pub remote: ConnStr,
    pub local_table: String,
    pub remote_table: String,
    pub fed_table: String,
    pub remote_cols: Vec<String>,
    pub local_cols: Vec<String>,
    pub where_suffix: String,
    pub remote_key: String,
    pub local_key: String,
    pub mode: RefreshMode,
    pub maxcount: usize,
    pub timeout: u64,
    pub pname: String,
    pub hb_sock: Option<PathBuf>,
}

impl RefreshConfig {
    pub fn from_params(params: &str) -> Result<Self> {
        let tags = TagBuffer::new(params);
        let charset = tags.get("charset");

        let mode = match tags.require_parse::<u8>("synctype")? {
            1 => RefreshMode::Single,
            2 => RefreshMode::Batched,
            other => {
                return Err(SyncError::Config(format!("synctype not in (1,2): {other}")));
            }
        };

        let config = Self {
            local: ConnStr::parse(tags.require("localconnstr")?, charset)?,
            remote: ConnStr::parse(tags.require("remoteconnstr")?, charset)?,
            local_table: tags.require("localtname")?.to_string(),
            remote_table: tags.require("remotetname")?.to_string(),
            fed_table: tags.require("fedtname")?.to_string(),
            // The refresh worker never consults the local dictionary, so
            // its column lists are mandatory.
            remote_cols: split_cols(Some(tags.require("remotecols")?)),
            local_cols: split_cols(Some(tags.require("localcols")?)),
            where_suffix: tags.get("where").unwrap_or("").trim().to_string(),
            remote_key: tags.require("remotekeycol")?.to_string(),
            local_key: tags.require("localkeycol")?.to_string(),
            mode,
            maxcount: tags
                .get_parse::<usize>("maxcount")?
                .unwrap_or(MAX_BATCH)
                .clamp(1, MAX_BATCH),
            timeout: tags.require_parse::<u64>("timeout")?,
            pname: tags.require("pname")?.to_string(),
            hb_sock: tags.get("hbsock").map(PathBuf::from),
        };

        if !config.remote_cols.is_empty()
            && !config.local_cols.is_empty()
            && config.remote_cols.len() != config.local_cols.len()
        {
            return Err(SyncError::Config(format!(
                "remotecols has {} names but localcols has {}",
                config.remote_cols.len(),
                config.local_cols.len()
            )));
        }
        if let Some(suffix) = non_and_suffix(&config.where_suffix) {
            return Err(SyncError::Config(format!(
                "where must be an AND-suffix, got {suffix:?}"
            )));
        }
        Ok(config)
    }
}

fn split_cols(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `Some(suffix)` when a non-empty suffix does not start with `and`.
fn non_and_suffix(suffix: &str) -> Option<&str> {
    if suffix.is_empty() {
        return None;
    }
    let lowered = suffix.to_lowercase();
    if lowered.starts_with("and ") || lowered == "and" {
        None
    } else {
        Some(suffix)
    }
}
