//! The shared CLI convention and configuration primitives.
//!
//! Every worker is invoked as `program <logfile> <paramxml>`, where the
//! second argument is a single tag buffer enumerating the worker's
//! configuration. Each daemon parses that buffer exactly once at startup
//! into its own typed config struct; the accessors on
//! [`quay_proto::TagBuffer`] do the heavy lifting, this module adds the
//! pieces shared across daemons.

use std::path::PathBuf;

use clap::Parser;
use sqlx::mysql::MySqlConnectOptions;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("bad parameter buffer: {0}")]
    Params(#[from] quay_proto::ProtoError),

    #[error("bad connection string {0:?}: expected ip,user,password,dbname,port")]
    ConnStr(String),
}

/// The two positional arguments every worker takes.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Log file for this process.
    pub logfile: PathBuf,

    /// Configuration as a single `<key>value</key>` tag buffer.
    pub params: String,
}

/// A database connection string in the `ip,user,password,dbname,port`
/// comma form, plus the session character set.
#[derive(Debug, Clone)]
pub struct ConnStr {
    pub host: String,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub port: u16,
    pub charset: Option<String>,
}

impl ConnStr {
    pub fn parse(raw: &str, charset: Option<&str>) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        let [host, user, password, dbname, port] = parts.as_slice() else {
            return Err(ConfigError::ConnStr(raw.to_string()));
        };
        if host.is_empty() || user.is_empty() || dbname.is_empty() {
            return Err(ConfigError::ConnStr(raw.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::ConnStr(raw.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            dbname: dbname.to_string(),
            port,
            charset: charset.map(str::to_string),
        })
    }

    pub fn to_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.dbname);
        if let Some(charset) = &self.charset {
            options = options.charset(charset);
        }
        options
    }
}

impl std::fmt::Display for ConnStr {
    /// Password elided; this form is what ends up in logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_form() {
        let c = ConnStr::parse("192.168.174.129,root,secret,mysql,3306", Some("utf8")).unwrap();
        assert_eq!(c.host, "192.168.174.129");
        assert_eq!(c.user, "root");
        assert_eq!(c.password, "secret");
        assert_eq!(c.dbname, "mysql");
        assert_eq!(c.port, 3306);
        assert_eq!(c.charset.as_deref(), Some("utf8"));
    }

    #[test]
    fn rejects_short_and_bad_port() {
        assert!(ConnStr::parse("host,user,pw,db", None).is_err());
        assert!(ConnStr::parse("host,user,pw,db,notaport", None).is_err());
        assert!(ConnStr::parse(",user,pw,db,3306", None).is_err());
    }

    #[test]
    fn display_elides_password() {
        let c = ConnStr::parse("h,u,topsecret,d,3306", None).unwrap();
        let shown = c.to_string();
        assert!(!shown.contains("topsecret"));
        assert_eq!(shown, "u@h:3306/d");
    }
}
