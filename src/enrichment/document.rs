//! Pure assembly of the enriched document from a finished inspection.

use log::debug;

use crate::ecs::{
    Body, ClientEndpoint, Crs, Document, Event, Http, HttpRequest, HttpResponse, Scores, Threat,
    ThreatEnrichment, Url, User,
};
use crate::lookup::{GeoLookup, UserAgentParser};
use crate::record::{RecordContext, RequestHead, ResponseHead};

/// Captured side of one body.
#[derive(Debug, Clone, Copy)]
pub struct BodySummary<'a> {
    pub mime: &'a str,
    pub bytes: &'a [u8],
}

impl BodySummary<'_> {
    fn to_body(self) -> Body {
        Body {
            bytes: self.bytes.len() as u64,
            content: String::from_utf8_lossy(self.bytes).into_owned(),
        }
    }
}

/// Everything the document is built from. Borrowed, never mutated.
pub struct DocumentParts<'a> {
    pub context: Option<&'a RecordContext>,
    pub request: &'a RequestHead,
    pub response: &'a ResponseHead,
    pub request_body: BodySummary<'a>,
    pub response_body: BodySummary<'a>,
    pub threats: Vec<ThreatEnrichment>,
    pub scores: Scores,
    pub geo: Option<&'a dyn GeoLookup>,
    pub user_agent: Option<&'a dyn UserAgentParser>,
}

pub fn assemble(parts: DocumentParts<'_>) -> Document {
    let ctx = parts.context;
    let request = parts.request;
    let request_id = ctx
        .and_then(|c| c.id.clone())
        .or_else(|| request.headers.get("x-request-id").map(str::to_string));

    let mut doc = Document::new();
    doc.timestamp = ctx.and_then(|c| c.durations.proxy.start);
    doc.event = Some(Event {
        kind: "event".to_string(),
        category: vec![
            "web".to_string(),
            "authentication".to_string(),
            "network".to_string(),
        ],
        kind_type: vec!["access".to_string()],
        id: request_id.clone(),
        created: ctx.and_then(|c| c.durations.total.start),
        end: ctx.and_then(|c| c.durations.total.end),
    });
    doc.url = Some(build_url(request, ctx));
    doc.http = Some(Http {
        version: request.version.number(),
        request: HttpRequest {
            id: request_id,
            method: request.method.clone(),
            referrer: request.headers.get("Referer").map(str::to_string),
            mime_type: parts.request_body.mime.to_string(),
            body: parts.request_body.to_body(),
            headers: Some(request.headers.to_lowercase_map()),
        },
        response: HttpResponse {
            status_code: parts.response.status,
            mime_type: parts.response_body.mime.to_string(),
            body: parts.response_body.to_body(),
            headers: Some(parts.response.headers.to_lowercase_map()),
        },
    });
    doc.threat = Some(Threat {
        enrichments: parts.threats,
    });
    doc.crs = Some(Crs {
        scores: parts.scores,
    });

    if let (Some(parser), Some(ua)) = (parts.user_agent, request.headers.get("User-Agent")) {
        match parser.parse(ua) {
            Ok(parsed) => doc.user_agent = Some(parsed),
            Err(e) => debug!("User agent omitted: {}", e),
        }
    }

    if let Some(credential) = ctx.and_then(|c| c.credential.as_ref()) {
        doc.user = Some(User {
            name: credential.username.clone(),
        });
    }

    let client_ip = ctx.and_then(|c| c.connection.as_ref()).map(|c| c.client.ip);
    if let (Some(geo), Some(ip)) = (parts.geo, client_ip) {
        match geo.lookup(ip) {
            Ok(found) => doc.client = Some(ClientEndpoint { ip, geo: found }),
            Err(e) => debug!("Geo location for {} omitted: {}", ip, e),
        }
    }

    doc
}

fn build_url(request: &RequestHead, ctx: Option<&RecordContext>) -> Url {
    let target = request.target.as_str();
    let mut url = Url {
        domain: request.host.clone(),
        full: target.to_string(),
        original: target.to_string(),
        ..Default::default()
    };

    let absolute = url::Url::parse(target).ok();
    let parsed = match absolute {
        Some(parsed) => {
            url.domain = url.domain.or_else(|| parsed.host_str().map(str::to_string));
            url.scheme = Some(parsed.scheme().to_string());
            Some(parsed)
        }
        None if target.starts_with('/') => {
            let server_port = ctx
                .and_then(|c| c.connection.as_ref())
                .and_then(|c| c.server.as_ref())
                .map(|s| s.port);
            let scheme = if server_port == Some(443) { "https" } else { "http" };
            let host = request.host.as_deref().unwrap_or("localhost");
            match url::Url::parse(&format!("{}://{}{}", scheme, host, target)) {
                Ok(parsed) => {
                    if request.host.is_some() {
                        url.full = parsed.to_string();
                        url.scheme = Some(scheme.to_string());
                    }
                    Some(parsed)
                }
                Err(_) => None,
            }
        }
        None => None,
    };

    if let Some(parsed) = parsed {
        url.path = Some(parsed.path().to_string());
        url.query = sorted_query(&parsed);
        url.fragment = parsed.fragment().map(str::to_string);
    }
    url
}

/// Query pairs ordered by key and re-encoded, `None` when there are none.
fn sorted_query(url: &url::Url) -> Option<String> {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut encoder = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        encoder.append_pair(k, v);
    }
    Some(encoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Geo, UserAgent};
    use crate::error_handling::types::LookupError;
    use crate::record::{ConnectionInfo, Credential, Endpoint, HeaderMap, HttpVersion};
    use std::net::IpAddr;

    struct FixedGeo;

    impl GeoLookup for FixedGeo {
        fn lookup(&self, ip: IpAddr) -> Result<Geo, LookupError> {
            if ip.is_loopback() {
                return Err(LookupError::NotFound);
            }
            Ok(Geo {
                city_name: Some("Jakarta".into()),
                ..Default::default()
            })
        }
    }

    struct FailingUa;

    impl UserAgentParser for FailingUa {
        fn parse(&self, _: &str) -> Result<UserAgent, LookupError> {
            Err(LookupError::Unrecognized("x".into()))
        }
    }

    fn request(target: &str, host: Option<&str>) -> RequestHead {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "*/*");
        headers.append("Referer", "http://example.com/");
        headers.append("X-Request-Id", "req-1");
        RequestHead {
            method: "GET".into(),
            target: target.into(),
            version: HttpVersion::HTTP_11,
            headers,
            host: host.map(str::to_string),
            transfer_encoding: Vec::new(),
            remote_addr: None,
        }
    }

    fn response() -> ResponseHead {
        let mut headers = HeaderMap::new();
        headers.append("Content-Type", "application/json");
        ResponseHead {
            status: 200,
            reason: "OK".into(),
            version: HttpVersion::HTTP_11,
            headers,
            transfer_encoding: Vec::new(),
        }
    }

    fn parts<'a>(
        ctx: Option<&'a RecordContext>,
        req: &'a RequestHead,
        res: &'a ResponseHead,
    ) -> DocumentParts<'a> {
        DocumentParts {
            context: ctx,
            request: req,
            response: res,
            request_body: BodySummary { mime: "", bytes: b"" },
            response_body: BodySummary {
                mime: "application/json",
                bytes: br#"{"a":1}"#,
            },
            threats: Vec::new(),
            scores: Scores::default(),
            geo: None,
            user_agent: None,
        }
    }

    #[test]
    fn test_minimal_document() {
        let req = request("/api/items?b=2&a=1&a=0#top", Some("shop.example"));
        let res = response();
        let doc = assemble(parts(None, &req, &res));

        assert_eq!(doc.ecs.version, "8.3.0");
        assert_eq!(doc.timestamp, None);
        let url = doc.url.unwrap();
        assert_eq!(url.domain.as_deref(), Some("shop.example"));
        assert_eq!(url.original, "/api/items?b=2&a=1&a=0#top");
        assert_eq!(url.full, "http://shop.example/api/items?b=2&a=1&a=0#top");
        assert_eq!(url.path.as_deref(), Some("/api/items"));
        assert_eq!(url.query.as_deref(), Some("a=1&a=0&b=2"));
        assert_eq!(url.fragment.as_deref(), Some("top"));

        let http = doc.http.unwrap();
        assert_eq!(http.version, "1.1");
        assert_eq!(http.request.id.as_deref(), Some("req-1"));
        assert_eq!(http.request.referrer.as_deref(), Some("http://example.com/"));
        assert_eq!(http.response.mime_type, "application/json");
        assert_eq!(http.response.body.bytes, 7);
        assert_eq!(http.response.body.content, r#"{"a":1}"#);
        let headers = http.request.headers.unwrap();
        assert!(headers.contains_key("x-request-id"));
        assert!(!headers.contains_key("X-Request-Id"));

        assert!(doc.threat.unwrap().enrichments.is_empty());
        assert!(doc.user.is_none());
        assert!(doc.client.is_none());
        assert!(doc.user_agent.is_none());
    }

    #[test]
    fn test_context_fields() {
        let ctx: RecordContext = serde_json::from_str(
            r#"{"id":"ctx-9",
                "durations":{"total":{"start":"2024-05-01T10:00:00Z","end":"2024-05-01T10:00:02Z"},
                             "proxy":{"start":"2024-05-01T10:00:01Z"}},
                "connection":{"client":{"ip":"203.0.113.9","port":5000},
                              "server":{"ip":"10.0.0.2","port":443}},
                "credential":{"username":"alice"}}"#,
        )
        .unwrap();
        let req = request("/login", Some("bank.example"));
        let res = response();
        let mut p = parts(Some(&ctx), &req, &res);
        p.geo = Some(&FixedGeo);
        let doc = assemble(p);

        assert_eq!(doc.timestamp, ctx.durations.proxy.start);
        let event = doc.event.unwrap();
        assert_eq!(event.id.as_deref(), Some("ctx-9"));
        assert_eq!(event.created, ctx.durations.total.start);
        assert_eq!(event.end, ctx.durations.total.end);
        assert_eq!(doc.http.unwrap().request.id.as_deref(), Some("ctx-9"));
        assert_eq!(doc.url.unwrap().full, "https://bank.example/login");
        assert_eq!(doc.user.unwrap().name, "alice");
        let client = doc.client.unwrap();
        assert_eq!(client.ip.to_string(), "203.0.113.9");
        assert_eq!(client.geo.city_name.as_deref(), Some("Jakarta"));
    }

    #[test]
    fn test_failed_lookups_omit_fields() {
        let ctx = RecordContext {
            connection: Some(ConnectionInfo {
                client: Endpoint {
                    ip: "127.0.0.1".parse().unwrap(),
                    port: 1,
                },
                server: None,
            }),
            credential: Some(Credential {
                username: "bob".into(),
            }),
            ..Default::default()
        };
        let mut req = request("/", None);
        req.headers.append("User-Agent", "???");
        let res = response();
        let mut p = parts(Some(&ctx), &req, &res);
        p.geo = Some(&FixedGeo);
        p.user_agent = Some(&FailingUa);
        let doc = assemble(p);

        assert!(doc.client.is_none());
        assert!(doc.user_agent.is_none());
        assert_eq!(doc.user.unwrap().name, "bob");
        let url = doc.url.unwrap();
        assert_eq!(url.domain, None);
        assert_eq!(url.full, "/");
        assert_eq!(url.scheme, None);
    }

    #[test]
    fn test_absolute_form_target() {
        let req = request("http://proxy.example:8080/a%20b?x=1", None);
        let res = response();
        let url = assemble(parts(None, &req, &res)).url.unwrap();
        assert_eq!(url.domain.as_deref(), Some("proxy.example"));
        assert_eq!(url.scheme.as_deref(), Some("http"));
        assert_eq!(url.full, "http://proxy.example:8080/a%20b?x=1");
        assert_eq!(url.path.as_deref(), Some("/a%20b"));
    }
}
