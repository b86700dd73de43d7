use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ECS_VERSION: &str = "8.3.0";
pub const MESSAGE: &str = "recorded HTTP message";

/// Enriched document for one exchange. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "@timestamp", skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
    pub ecs: Ecs,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event: Option<Event>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http: Option<Http>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threat: Option<Threat>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub crs: Option<Crs>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<UserAgent>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client: Option<ClientEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<User>,
}

/// Reduced shape: message, URL, HTTP without headers and threats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicDocument {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http: Option<Http>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threat: Option<Threat>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            timestamp: None,
            message: MESSAGE.to_string(),
            ecs: Ecs {
                version: ECS_VERSION.to_string(),
            },
            event: None,
            url: None,
            http: None,
            threat: None,
            crs: None,
            user_agent: None,
            client: None,
            user: None,
        }
    }

    /// Projection onto the basic shape; header maps are dropped.
    pub fn basic_view(&self) -> BasicDocument {
        let http = self.http.as_ref().map(|http| {
            let mut http = http.clone();
            http.request.headers = None;
            http.response.headers = None;
            http
        });
        BasicDocument {
            message: self.message.clone(),
            url: self.url.clone(),
            http,
            threat: self.threat.clone(),
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ecs {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub category: Vec<String>,
    #[serde(rename = "type")]
    pub kind_type: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain: Option<String>,
    pub full: String,
    pub original: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fragment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Http {
    pub version: String,
    pub request: HttpRequest,
    pub response: HttpResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub mime_type: String,
    pub body: Body,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub mime_type: String,
    pub body: Body,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
}

/// Captured body: retained byte count and the retained bytes as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub bytes: u64,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub enrichments: Vec<ThreatEnrichment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEnrichment {
    pub indicator: ThreatIndicator,
    pub matched: ThreatMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIndicator {
    #[serde(rename = "type")]
    pub indicator_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip: Option<IpAddr>,
    pub confidence: Confidence,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatMatch {
    pub atomic: String,
    pub field: String,
    #[serde(rename = "type")]
    pub match_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[default]
    #[serde(rename = "Not Specified")]
    NotSpecified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    pub scores: Scores,
}

/// Engine anomaly counters, 0 when the engine does not track one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub inbound_anomaly: i64,
    pub outbound_anomaly: i64,
    pub sql_injection: i64,
    pub xss: i64,
    pub rfi: i64,
    pub lfi: i64,
    pub rce: i64,
    pub php_injection: i64,
    pub http_violation: i64,
    pub session_fixation: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgent {
    pub original: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub os: Option<Os>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Os {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEndpoint {
    pub ip: IpAddr,
    pub geo: Geo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub city_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub country_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub country_iso_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub continent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub continent_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http() -> Http {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), vec!["*/*".to_string()]);
        Http {
            version: "1.1".into(),
            request: HttpRequest {
                id: None,
                method: "GET".into(),
                referrer: None,
                mime_type: String::new(),
                body: Body::default(),
                headers: Some(headers.clone()),
            },
            response: HttpResponse {
                status_code: 200,
                mime_type: "application/json".into(),
                body: Body {
                    bytes: 7,
                    content: r#"{"a":1}"#.into(),
                },
                headers: Some(headers),
            },
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let mut doc = Document::new();
        doc.http = Some(http());
        doc.threat = Some(Threat {
            enrichments: vec![ThreatEnrichment {
                indicator: ThreatIndicator {
                    indicator_type: "network-traffic".into(),
                    description: "d".into(),
                    ip: None,
                    confidence: Confidence::NotSpecified,
                    provider: "OWASP_CRS/3.3.2".into(),
                },
                matched: ThreatMatch {
                    atomic: "x".into(),
                    field: "ARGS:q".into(),
                    match_type: "indicator_match_rule".into(),
                },
            }],
        });

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["message"], "recorded HTTP message");
        assert_eq!(value["ecs"]["version"], "8.3.0");
        assert!(value.get("@timestamp").is_none());
        assert!(value.get("user").is_none());
        assert_eq!(value["http"]["response"]["body"]["bytes"], 7);
        assert!(value["http"]["request"].get("mime_type").is_none());
        let enrichment = &value["threat"]["enrichments"][0];
        assert_eq!(enrichment["indicator"]["type"], "network-traffic");
        assert_eq!(enrichment["indicator"]["confidence"], "Not Specified");
        assert_eq!(enrichment["matched"]["type"], "indicator_match_rule");
    }

    #[test]
    fn test_basic_view_drops_headers() {
        let mut doc = Document::new();
        doc.http = Some(http());
        doc.user = Some(User { name: "alice".into() });
        doc.crs = Some(Crs::default());

        let basic = serde_json::to_value(doc.basic_view()).unwrap();
        assert_eq!(
            basic,
            json!({
                "message": "recorded HTTP message",
                "http": {
                    "version": "1.1",
                    "request": {"method": "GET", "body": {"bytes": 0, "content": ""}},
                    "response": {
                        "status_code": 200,
                        "mime_type": "application/json",
                        "body": {"bytes": 7, "content": "{\"a\":1}"}
                    }
                }
            })
        );
    }

    #[test]
    fn test_confidence_names() {
        assert_eq!(serde_json::to_value(Confidence::High).unwrap(), "High");
        assert_eq!(Confidence::default(), Confidence::NotSpecified);
        let parsed: Confidence = serde_json::from_str("\"Not Specified\"").unwrap();
        assert_eq!(parsed, Confidence::NotSpecified);
    }
}
