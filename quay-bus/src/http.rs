//! Just enough HTTP for the bus.
//!
//! The surface is one verb, any path, parameters in the query string, and
//! a pseudo-XML body. Nothing here needs a real HTTP stack; the request
//! fits one read and the response is written piecewise as rows stream.

use std::collections::HashMap;

/// Parsed GET parameters.
#[derive(Debug, Default, Clone)]
pub struct Request {
    params: HashMap<String, String>,
}

impl Request {
    /// Parse a raw request buffer. `None` unless it starts with `GET `.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("GET ")?;
        let target = rest.split_whitespace().next().unwrap_or("");
        let query = match target.find('?') {
            Some(pos) => &target[pos + 1..],
            None => "",
        };

        let mut params = HashMap::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params.entry(key.into_owned()).or_insert(value.into_owned());
        }
        Some(Self { params })
    }

    pub fn get(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Response head shared by every reply.
pub const RESPONSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
    Server: quay-busd\r\n\
    Content-Type: text/html;charset=utf-8\r\n\r\n";

/// The `<retcode>` status line every body starts with.
pub fn status_line(retcode: i64, message: &str) -> String {
    format!("<retcode>{retcode}</retcode><message>{message}</message>\n")
}

pub fn auth_failed_body() -> String {
    status_line(-1, "username or passwd is invalid")
}

pub fn permission_denied_body() -> String {
    status_line(-1, "permission denied")
}

pub fn internal_error_body() -> String {
    status_line(-1, "internal error")
}

/// One streamed row: `<col>value</col>` per output column plus the
/// end-of-row marker.
pub fn row_line(columns: &[String], values: &[String]) -> String {
    let mut line = String::new();
    for (name, value) in columns.iter().zip(values) {
        line.push_str(&format!("<{name}>{value}</{name}>"));
    }
    line.push_str("<endl/>\n");
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_query_string() {
        let raw = "GET /?username=u&passwd=p&intername=get_obs&obtid=59287 HTTP/1.1\r\n\
                   Host: example\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.get("username"), "u");
        assert_eq!(req.get("intername"), "get_obs");
        assert_eq!(req.get("obtid"), "59287");
        assert_eq!(req.get("absent"), "");
    }

    #[test]
    fn decodes_percent_escapes() {
        let req = Request::parse("GET /?q=a%20b&obtid=1 HTTP/1.1\r\n").unwrap();
        assert_eq!(req.get("q"), "a b");
    }

    #[test]
    fn rejects_non_get() {
        assert!(Request::parse("POST / HTTP/1.1\r\n").is_none());
        assert!(Request::parse("garbage").is_none());
    }

    #[test]
    fn path_without_query_is_empty_params() {
        let req = Request::parse("GET / HTTP/1.1\r\n").unwrap();
        assert_eq!(req.get("username"), "");
    }

    #[test]
    fn row_line_pairs_columns_with_values() {
        let line = row_line(
            &["obtid".into(), "t".into()],
            &["59287".into(), "126".into()],
        );
        assert_eq!(line, "<obtid>59287</obtid><t>126</t><endl/>\n");
    }
}
