//! Bus configuration.

use quay_core::config::{ConfigError, ConnStr};
use quay_proto::TagBuffer;

use crate::workers::WorkerConfig;

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub connstr: ConnStr,
    pub port: u16,
    /// Keepalive variant: sockets stay open between requests.
    pub keepalive: bool,
    pub workers: WorkerConfig,
}

impl BusConfig {
    pub fn from_params(params: &str) -> Result<Self, ConfigError> {
        let tags = TagBuffer::new(params);

        let connstr = ConnStr::parse(tags.require("connstr")?, tags.get("charset"))?;
        let mut workers = WorkerConfig::default();
        if let Some(count) = tags.get_parse::<usize>("workers")? {
            workers.workers = count.max(1);
        }

        Ok(Self {
            connstr,
            port: tags.require_parse("port")?,
            keepalive: tags.get_bool("keepalive"),
            workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_params() {
        let cfg = BusConfig::from_params(
            "<connstr>127.0.0.1,root,pw,idc,3306</connstr><charset>utf8</charset><port>8080</port>",
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.keepalive);
        assert_eq!(cfg.workers.workers, 10);
        assert_eq!(cfg.connstr.dbname, "idc");
    }

    #[test]
    fn parses_keepalive_and_worker_count() {
        let cfg = BusConfig::from_params(
            "<connstr>h,u,p,d,3306</connstr><port>8080</port>\
             <keepalive>true</keepalive><workers>4</workers>",
        )
        .unwrap();
        assert!(cfg.keepalive);
        assert_eq!(cfg.workers.workers, 4);
    }

    #[test]
    fn requires_connstr_and_port() {
        assert!(BusConfig::from_params("<port>8080</port>").is_err());
        assert!(BusConfig::from_params("<connstr>h,u,p,d,3306</connstr>").is_err());
    }
}
