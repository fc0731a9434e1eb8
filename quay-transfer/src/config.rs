//! Typed configuration for the transfer daemons, parsed once from the CLI
//! parameter buffer.

use std::path::PathBuf;

use quay_proto::{LoginRequest, PostTransferPolicy, ProtoError, SessionKind, TagBuffer};

use crate::error::{Result, TransferError};
use crate::walker::MatchRules;

/// Configuration of `quay-putfiles` / `quay-getfiles`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
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
    pub hb_sock: Option<PathBuf>,
}

impl ClientConfig {
    /// Parse the parameter buffer for a client of the given direction.
    pub fn from_params(params: &str, kind: SessionKind) -> Result<Self> {
        let tags = TagBuffer::new(params);

        let policy = PostTransferPolicy::from_code(tags.require_parse::<u8>("ptype")?)?;
        let client_path = tags.require("clientpath")?.to_string();
        let client_path_bak = tags.get("clientpathbak").map(str::to_string);
        let srv_path = tags.require("srvpath")?.to_string();
        let srv_path_bak = tags.get("srvpathbak").map(str::to_string);

        // The sender's backup root is mandatory under the move-to-backup
        // policy: for a pusher that is the client side, for a puller the
        // server side.
        if policy == PostTransferPolicy::MoveToBackup {
            let missing = match kind {
                SessionKind::Push => client_path_bak.is_none(),
                SessionKind::Pull => srv_path_bak.is_none(),
            };
            if missing {
                let key = match kind {
                    SessionKind::Push => "clientpathbak",
                    SessionKind::Pull => "srvpathbak",
                };
                return Err(ProtoError::Malformed(format!("{key} is null")).into());
            }
        }

        let match_name = tags.require("matchname")?.to_string();
        MatchRules::parse(&match_name)?;

        let timetvl = tags.require_parse::<u64>("timetvl")?.clamp(1, 30);
        let timeout = tags.require_parse::<u64>("timeout")?.max(50);

        Ok(Self {
            server_ip: tags.require("ip")?.to_string(),
            server_port: tags.require_parse("port")?,
            kind,
            policy,
            client_path,
            client_path_bak,
            srv_path,
            srv_path_bak,
            and_child: tags.get_bool("andchild"),
            match_name,
            timetvl,
            timeout,
            pname: tags.require("pname")?.to_string(),
            hb_sock: tags.get("hbsock").map(PathBuf::from),
        })
    }

    /// The login message announcing this configuration to the server.
    pub fn login_request(&self) -> LoginRequest {
        LoginRequest {
            kind: self.kind,
            policy: self.policy,
            client_path: self.client_path.clone(),
            client_path_bak: self.client_path_bak.clone(),
            srv_path: self.srv_path.clone(),
            srv_path_bak: self.srv_path_bak.clone(),
            and_child: self.and_child,
            match_name: self.match_name.clone(),
            timetvl: self.timetvl,
            timeout: self.timeout,
            pname: self.pname.clone(),
        }
    }
}

/// Configuration of `quay-fileserver`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub hb_sock: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_params(params: &str) -> Result<Self> {
        let tags = TagBuffer::new(params);
        Ok(Self {
            port: tags.require_parse("port")?,
            hb_sock: tags.get("hbsock").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUSH_PARAMS: &str = "<ip>192.168.174.133</ip><port>5005</port><ptype>1</ptype>\
         <clientpath>/tmp/out</clientpath><andchild>true</andchild>\
         <matchname>*.XML,*.CSV</matchname><srvpath>/tmp/in</srvpath>\
         <timetvl>10</timetvl><timeout>60</timeout><pname>putfiles_surf</pname>";

    #[test]
    fn parses_push_client_params() {
        let cfg = ClientConfig::from_params(PUSH_PARAMS, SessionKind::Push).unwrap();
        assert_eq!(cfg.server_ip, "192.168.174.133");
        assert_eq!(cfg.server_port, 5005);
        assert_eq!(cfg.policy, PostTransferPolicy::Delete);
        assert!(cfg.and_child);
        assert_eq!(cfg.timetvl, 10);
        assert_eq!(cfg.timeout, 60);
    }

    #[test]
    fn clamps_ranges() {
        let params = PUSH_PARAMS
            .replace("<timetvl>10</timetvl>", "<timetvl>300</timetvl>")
            .replace("<timeout>60</timeout>", "<timeout>3</timeout>");
        let cfg = ClientConfig::from_params(&params, SessionKind::Push).unwrap();
        assert_eq!(cfg.timetvl, 30);
        assert_eq!(cfg.timeout, 50);
    }

    #[test]
    fn move_to_backup_requires_backup_root() {
        let params = PUSH_PARAMS.replace("<ptype>1</ptype>", "<ptype>2</ptype>");
        assert!(ClientConfig::from_params(&params, SessionKind::Push).is_err());

        let with_bak = format!("{params}<clientpathbak>/tmp/outbak</clientpathbak>");
        let cfg = ClientConfig::from_params(&with_bak, SessionKind::Push).unwrap();
        assert_eq!(cfg.client_path_bak.as_deref(), Some("/tmp/outbak"));

        // For a puller the backup root lives on the server side.
        assert!(ClientConfig::from_params(&params, SessionKind::Pull).is_err());
        let pull_ok = format!("{params}<srvpathbak>/tmp/inbak</srvpathbak>");
        assert!(ClientConfig::from_params(&pull_ok, SessionKind::Pull).is_ok());
    }

    #[test]
    fn rejects_bad_glob() {
        let params = PUSH_PARAMS.replace("*.XML,*.CSV", "a[");
        assert!(ClientConfig::from_params(&params, SessionKind::Push).is_err());
    }

    #[test]
    fn server_params() {
        let cfg = ServerConfig::from_params("<port>5005</port><hbsock>/run/quay.sock</hbsock>")
            .unwrap();
        assert_eq!(cfg.port, 5005);
        assert_eq!(cfg.hb_sock.as_deref(), Some(std::path::Path::new("/run/quay.sock")));
    }
}
