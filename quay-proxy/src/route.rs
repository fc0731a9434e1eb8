//! The relay's route table.
//!
//! Plain text, one route per line: `listen_port dst_ip dst_port`,
//! whitespace-separated. A `#` starts a comment; blank lines are ignored.
//! Listen ports must be unique across the table.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub listen_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
}

pub fn load_routes(path: &Path) -> Result<Vec<Route>> {
    parse_routes(&std::fs::read_to_string(path)?)
}

pub fn parse_routes(text: &str) -> Result<Vec<Route>> {
    let mut routes = Vec::new();
    let mut seen_ports = HashSet::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = match raw_line.find('#') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let [listen_port, dst_ip, dst_port] = fields.as_slice() else {
            return Err(ProxyError::BadRoute {
                line: index + 1,
                reason: format!("expected 3 fields, got {}", fields.len()),
            });
        };

        let listen_port: u16 = listen_port.parse().map_err(|_| ProxyError::BadRoute {
            line: index + 1,
            reason: format!("bad listen port {listen_port:?}"),
        })?;
        let dst_port: u16 = dst_port.parse().map_err(|_| ProxyError::BadRoute {
            line: index + 1,
            reason: format!("bad destination port {dst_port:?}"),
        })?;

        if !seen_ports.insert(listen_port) {
            return Err(ProxyError::DuplicateListenPort(listen_port));
        }

        routes.push(Route {
            listen_port,
            dst_ip: dst_ip.to_string(),
            dst_port,
        });
    }

    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_routes_with_comments_and_blanks() {
        let text = "\
# inbound ssh
9000 10.0.0.5 22

9001  10.0.0.6   3306   # mysql
";
        let routes = parse_routes(text).unwrap();
        assert_eq!(
            routes,
            vec![
                Route {
                    listen_port: 9000,
                    dst_ip: "10.0.0.5".into(),
                    dst_port: 22,
                },
                Route {
                    listen_port: 9001,
                    dst_ip: "10.0.0.6".into(),
                    dst_port: 3306,
                },
            ]
        );
    }

    #[test]
    fn rejects_duplicate_listen_ports() {
        let text = "9000 10.0.0.5 22\n9000 10.0.0.6 23\n";
        assert!(matches!(
            parse_routes(text),
            Err(ProxyError::DuplicateListenPort(9000))
        ));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_routes("9000 10.0.0.5\n").is_err());
        assert!(parse_routes("notaport 10.0.0.5 22\n").is_err());
    }

    #[test]
    fn empty_table_is_legal() {
        assert!(parse_routes("# nothing yet\n").unwrap().is_empty());
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.conf");
        std::fs::write(&path, "9000 10.0.0.5 22\n").unwrap();

        let routes = load_routes(&path).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].dst_ip, "10.0.0.5");

        assert!(load_routes(&dir.path().join("absent.conf")).is_err());
    }
}
