//! Data types produced by the recorded-message reader.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered header multimap.
///
/// Names keep the case they were captured with; lookups are case-insensitive.
/// A name repeated on the wire appears once per occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Header names folded to lowercase, values grouped in capture order.
    pub fn to_lowercase_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in &self.entries {
            map.entry(k.to_ascii_lowercase()).or_default().push(v.clone());
        }
        map
    }

    pub(crate) fn remove_all(&mut self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }
}

/// HTTP/1.x protocol version as parsed from the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpVersion {
    pub major: u8,
    pub minor: u8,
}

impl HttpVersion {
    pub const HTTP_10: HttpVersion = HttpVersion { major: 1, minor: 0 };
    pub const HTTP_11: HttpVersion = HttpVersion { major: 1, minor: 1 };

    /// `HTTP/1.1` form used on the wire.
    pub fn proto(&self) -> String {
        format!("HTTP/{}.{}", self.major, self.minor)
    }

    /// `1.1` form used in documents.
    pub fn number(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target exactly as recorded (origin-form or absolute-form).
    pub target: String,
    pub version: HttpVersion,
    /// Remaining headers; `Host` and `Transfer-Encoding` are lifted out.
    pub headers: HeaderMap,
    pub host: Option<String>,
    pub transfer_encoding: Vec<String>,
    /// Peer address (`ip:port`) recorded in the capture context.
    pub remote_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub version: HttpVersion,
    /// Remaining headers; `Transfer-Encoding` is lifted out.
    pub headers: HeaderMap,
    pub transfer_encoding: Vec<String>,
}

/// Capture-time metadata stored alongside the raw exchange.
///
/// Carried through verbatim; the pipeline never reconstructs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub durations: Durations,
    #[serde(default)]
    pub connection: Option<ConnectionInfo>,
    #[serde(default)]
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Durations {
    #[serde(default)]
    pub total: Span,
    #[serde(default)]
    pub proxy: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub client: Endpoint,
    #[serde(default)]
    pub server: Option<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    #[serde(default)]
    pub port: u16,
}

impl Endpoint {
    /// `ip:port`, with IPv6 addresses bracketed.
    pub fn addr(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => format!("{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "text/html");
        headers.append("X-Trace", "a");
        headers.append("x-trace", "b");

        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.get_all("X-TRACE").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(headers.len(), 3);

        let lower = headers.to_lowercase_map();
        assert_eq!(lower.get("x-trace"), Some(&vec!["a".to_string(), "b".to_string()]));
        assert!(lower.get("X-Trace").is_none());
    }

    #[test]
    fn test_remove_all_lifts_every_occurrence() {
        let mut headers = HeaderMap::new();
        headers.append("Host", "example.com");
        headers.append("Accept", "*/*");
        assert_eq!(headers.remove_all("host"), vec!["example.com".to_string()]);
        assert!(!headers.contains("Host"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_context_fields_are_optional() {
        let ctx: RecordContext = serde_json::from_str("{}").unwrap();
        assert_eq!(ctx, RecordContext::default());

        let ctx: RecordContext = serde_json::from_str(
            r#"{"id":"abc","connection":{"client":{"ip":"::1","port":80}},"credential":{"username":"bob"}}"#,
        )
        .unwrap();
        assert_eq!(ctx.id.as_deref(), Some("abc"));
        assert_eq!(ctx.connection.unwrap().client.addr(), "[::1]:80");
        assert_eq!(ctx.credential.unwrap().username, "bob");
    }
}
