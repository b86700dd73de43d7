use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub records_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_dir: PathBuf::from("records"),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// Deadline for one whole inspection, 0 disables it.
    pub read_timeout_secs: u64,
    /// Bytes handed to the content sniffer before it classifies.
    pub sniff_window: usize,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 30,
            sniff_window: 3072,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyLimitAction {
    ProcessPartial,
    Reject,
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub request_body_limit: usize,
    pub response_body_limit: usize,
    pub body_limit_action: BodyLimitAction,
    pub response_body_access: bool,
    pub response_body_mime_types: Vec<String>,
    /// Extra TOML files holding `[[rules]]`, relative to the config file.
    pub rule_files: Vec<PathBuf>,
    pub rules: Vec<RuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_body_limit: 128 * 1024,
            response_body_limit: 512 * 1024,
            body_limit_action: BodyLimitAction::ProcessPartial,
            response_body_access: true,
            response_body_mime_types: vec![
                "text/plain".to_string(),
                "text/html".to_string(),
                "text/xml".to_string(),
                "application/json".to_string(),
            ],
            rule_files: Vec::new(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Notice,
}

impl Severity {
    /// Anomaly points added to the transaction score for one match.
    pub fn anomaly_points(&self) -> i64 {
        match self {
            Severity::Critical => 5,
            Severity::Error => 4,
            Severity::Warning => 3,
            Severity::Notice => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl RulePhase {
    pub fn is_inbound(&self) -> bool {
        matches!(self, RulePhase::RequestHeaders | RulePhase::RequestBody)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleTarget {
    RequestUri,
    Args,
    RequestHeaders,
    RequestBody,
    ResponseStatus,
    ResponseHeaders,
    ResponseBody,
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct RuleConfig {
    pub id: u64,
    pub msg: String,
    pub severity: Severity,
    pub phase: RulePhase,
    pub targets: Vec<RuleTarget>,
    pub pattern: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: String,
}

/// Layout of a standalone rule file.
#[derive(Debug, Default, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub user_agent: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { user_agent: true }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub networks: Vec<GeoNetworkConfig>,
}

#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeoNetworkConfig {
    pub cidr: String,
    pub city_name: Option<String>,
    pub country_name: Option<String>,
    pub country_iso_code: Option<String>,
    pub continent_name: Option<String>,
    pub continent_code: Option<String>,
    pub postal_code: Option<String>,
    pub timezone: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}
