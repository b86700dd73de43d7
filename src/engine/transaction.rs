//! Boundary between the enrichment pipeline and the inspection engine.
//!
//! The pipeline only ever sees an engine through these traits, so any rule
//! engine (or a test double) can sit behind them.

use std::io::Write;

use crate::error_handling::types::EngineError;

pub const INBOUND_ANOMALY_SCORE: &str = "inbound_anomaly_score";
pub const OUTBOUND_ANOMALY_SCORE: &str = "outbound_anomaly_score";
pub const SQL_INJECTION_SCORE: &str = "sql_injection_score";
pub const XSS_SCORE: &str = "xss_score";
pub const RFI_SCORE: &str = "rfi_score";
pub const LFI_SCORE: &str = "lfi_score";
pub const RCE_SCORE: &str = "rce_score";
pub const PHP_INJECTION_SCORE: &str = "php_injection_score";
pub const HTTP_VIOLATION_SCORE: &str = "http_violation_score";
pub const SESSION_FIXATION_SCORE: &str = "session_fixation_score";

/// Factory for per-exchange transactions. Shared across inspections.
pub trait InspectionEngine: Send + Sync {
    fn new_transaction(&self) -> Box<dyn Transaction>;
}

/// Stateful per-exchange inspection session.
///
/// Methods must be driven in protocol order: connection, URI, request
/// headers, request body, response headers, response body. Calling them out
/// of order is a caller bug with engine-specific results.
pub trait Transaction: Send {
    fn process_connection(
        &mut self,
        client: &str,
        client_port: u16,
        server: &str,
        server_port: u16,
    );
    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str);
    fn add_request_header(&mut self, name: &str, value: &str);
    fn process_request_headers(&mut self);
    /// Sink receiving the raw request body before evaluation.
    fn request_body_writer(&mut self) -> &mut dyn Write;
    fn process_request_body(&mut self) -> Result<(), EngineError>;
    fn add_response_header(&mut self, name: &str, value: &str);
    fn process_response_headers(&mut self, status: u16, protocol: &str);
    /// Sink receiving the raw response body before evaluation.
    fn response_body_writer(&mut self) -> &mut dyn Write;
    /// Whether the engine wants to evaluate the response body at all.
    fn is_processable_response_body(&self) -> bool;
    fn process_response_body(&mut self) -> Result<(), EngineError>;
    fn matched_rules(&self) -> &[MatchedRule];
    /// Named anomaly counter, `None` when the engine does not track it.
    fn score(&self, _name: &str) -> Option<i64> {
        None
    }
    /// Emits the audit trail for this transaction.
    fn process_logging(&mut self);
    /// Drops all per-transaction state.
    fn clean(&mut self);
}

/// Rule metadata attached to a finding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleInfo {
    pub id: u64,
    pub msg: String,
    pub severity: String,
    pub version: String,
    pub tags: Vec<String>,
}

/// Variable that triggered a rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchData {
    /// e.g. `ARGS:id` or `REQUEST_HEADERS:User-Agent`.
    pub variable_name: String,
    pub value: String,
    /// Part of `value` the pattern matched.
    pub matched: String,
}

/// One rule match reported by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchedRule {
    pub rule: RuleInfo,
    pub client_ip: String,
    pub uri: String,
    pub unique_id: String,
    pub matched_data: MatchData,
}

impl MatchedRule {
    /// Single-line audit message in the ModSecurity error log layout.
    pub fn error_log(&self) -> String {
        let mut line = format!(
            "[client \"{}\"] Warning. {} [id \"{}\"] [msg \"{}\"] [data \"Matched Data: {} found within {}\"] [severity \"{}\"] [ver \"{}\"]",
            self.client_ip,
            self.rule.msg,
            self.rule.id,
            self.rule.msg,
            self.matched_data.matched,
            self.matched_data.variable_name,
            self.rule.severity,
            self.rule.version,
        );
        for tag in &self.rule.tags {
            line.push_str(&format!(" [tag \"{}\"]", tag));
        }
        line.push_str(&format!(
            " [uri \"{}\"] [unique_id \"{}\"]",
            self.uri, self.unique_id
        ));
        line
    }
}
