//! Minimal regex-per-rule engine.
//!
//! Each configured rule is one pattern evaluated against a fixed set of
//! transaction variables in one phase. A rule reports at most one match per
//! transaction. Matches feed anomaly scores keyed the way CRS names them.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use log::{debug, warn};
use regex::Regex;
use uuid::Uuid;

use super::transaction::{
    InspectionEngine, MatchData, MatchedRule, RuleInfo, Transaction, HTTP_VIOLATION_SCORE,
    INBOUND_ANOMALY_SCORE, LFI_SCORE, OUTBOUND_ANOMALY_SCORE, PHP_INJECTION_SCORE, RCE_SCORE,
    RFI_SCORE, SESSION_FIXATION_SCORE, SQL_INJECTION_SCORE, XSS_SCORE,
};
use crate::configuration::types::{BodyLimitAction, EngineConfig, RulePhase, RuleTarget, Severity};
use crate::enrichment::truncated_buffer::TruncatedBuffer;
use crate::error_handling::types::{ConfigError, EngineError};

struct CompiledRule {
    id: u64,
    msg: String,
    severity: Severity,
    phase: RulePhase,
    targets: Vec<RuleTarget>,
    tags: Vec<String>,
    version: String,
    regex: Regex,
}

struct RuleSet {
    rules: Vec<CompiledRule>,
    request_body_limit: usize,
    response_body_limit: usize,
    body_limit_action: BodyLimitAction,
    response_body_access: bool,
    response_mime_types: Vec<String>,
}

/// Engine built from `[engine]` configuration. Cheap to share.
#[derive(Clone)]
pub struct PatternEngine {
    rules: Arc<RuleSet>,
}

impl PatternEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let regex = Regex::new(&rule.pattern)
                .map_err(|e| ConfigError::InvalidRule(format!("rule {}: {}", rule.id, e)))?;
            rules.push(CompiledRule {
                id: rule.id,
                msg: rule.msg.clone(),
                severity: rule.severity,
                phase: rule.phase,
                targets: rule.targets.clone(),
                tags: rule.tags.clone(),
                version: rule.version.clone(),
                regex,
            });
        }
        debug!("PatternEngine compiled {} rules", rules.len());

        Ok(Self {
            rules: Arc::new(RuleSet {
                rules,
                request_body_limit: config.request_body_limit,
                response_body_limit: config.response_body_limit,
                body_limit_action: config.body_limit_action,
                response_body_access: config.response_body_access,
                response_mime_types: config
                    .response_body_mime_types
                    .iter()
                    .map(|m| m.to_ascii_lowercase())
                    .collect(),
            }),
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.rules.len()
    }
}

impl InspectionEngine for PatternEngine {
    fn new_transaction(&self) -> Box<dyn Transaction> {
        Box::new(PatternTransaction::new(Arc::clone(&self.rules)))
    }
}

pub struct PatternTransaction {
    rules: Arc<RuleSet>,
    unique_id: String,
    client_ip: String,
    uri: String,
    request_headers: Vec<(String, String)>,
    request_body: TruncatedBuffer,
    status: u16,
    response_headers: Vec<(String, String)>,
    response_body: TruncatedBuffer,
    matched: Vec<MatchedRule>,
    matched_ids: HashSet<u64>,
    scores: HashMap<&'static str, i64>,
    logged: bool,
}

impl PatternTransaction {
    fn new(rules: Arc<RuleSet>) -> Self {
        let request_body = TruncatedBuffer::new(rules.request_body_limit);
        let response_body = TruncatedBuffer::new(rules.response_body_limit);
        Self {
            rules,
            unique_id: Uuid::new_v4().to_string(),
            client_ip: String::new(),
            uri: String::new(),
            request_headers: Vec::new(),
            request_body,
            status: 0,
            response_headers: Vec::new(),
            response_body,
            matched: Vec::new(),
            matched_ids: HashSet::new(),
            scores: HashMap::new(),
            logged: false,
        }
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn variables(&self, target: RuleTarget) -> Vec<(String, String)> {
        match target {
            RuleTarget::RequestUri => vec![("REQUEST_URI".to_string(), self.uri.clone())],
            RuleTarget::Args => {
                let mut args = Vec::new();
                if let Some((_, query)) = self.uri.split_once('?') {
                    args.extend(url::form_urlencoded::parse(query.as_bytes()).map(|(k, v)| {
                        (format!("ARGS:{}", k), v.into_owned())
                    }));
                }
                let form = Self::header(&self.request_headers, "Content-Type")
                    .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
                    .unwrap_or(false);
                if form {
                    args.extend(
                        url::form_urlencoded::parse(self.request_body.as_bytes())
                            .map(|(k, v)| (format!("ARGS:{}", k), v.into_owned())),
                    );
                }
                args
            }
            RuleTarget::RequestHeaders => self
                .request_headers
                .iter()
                .map(|(k, v)| (format!("REQUEST_HEADERS:{}", k), v.clone()))
                .collect(),
            RuleTarget::RequestBody => vec![(
                "REQUEST_BODY".to_string(),
                self.request_body.content().into_owned(),
            )],
            RuleTarget::ResponseStatus => {
                vec![("RESPONSE_STATUS".to_string(), self.status.to_string())]
            }
            RuleTarget::ResponseHeaders => self
                .response_headers
                .iter()
                .map(|(k, v)| (format!("RESPONSE_HEADERS:{}", k), v.clone()))
                .collect(),
            RuleTarget::ResponseBody => vec![(
                "RESPONSE_BODY".to_string(),
                self.response_body.content().into_owned(),
            )],
        }
    }

    fn first_match(&self, rule: &CompiledRule) -> Option<MatchData> {
        for target in &rule.targets {
            for (name, value) in self.variables(*target) {
                if let Some(m) = rule.regex.find(&value) {
                    let matched = m.as_str().to_string();
                    return Some(MatchData {
                        variable_name: name,
                        value,
                        matched,
                    });
                }
            }
        }
        None
    }

    fn evaluate(&mut self, phase: RulePhase) {
        let rules = Arc::clone(&self.rules);
        for rule in rules.rules.iter().filter(|r| r.phase == phase) {
            if self.matched_ids.contains(&rule.id) {
                continue;
            }
            if let Some(data) = self.first_match(rule) {
                self.record_match(rule, data);
            }
        }
    }

    fn record_match(&mut self, rule: &CompiledRule, data: MatchData) {
        let points = rule.severity.anomaly_points();
        let direction = if rule.phase.is_inbound() {
            INBOUND_ANOMALY_SCORE
        } else {
            OUTBOUND_ANOMALY_SCORE
        };
        *self.scores.entry(direction).or_insert(0) += points;
        if let Some(category) = rule.tags.iter().find_map(|t| category_score(t)) {
            *self.scores.entry(category).or_insert(0) += points;
        }

        self.matched_ids.insert(rule.id);
        self.matched.push(MatchedRule {
            rule: RuleInfo {
                id: rule.id,
                msg: rule.msg.clone(),
                severity: rule.severity.as_str().to_string(),
                version: rule.version.clone(),
                tags: rule.tags.clone(),
            },
            client_ip: self.client_ip.clone(),
            uri: self.uri.clone(),
            unique_id: self.unique_id.clone(),
            matched_data: data,
        });
    }

    fn check_limit(&self, body: &TruncatedBuffer) -> Result<(), EngineError> {
        if body.is_truncated() && self.rules.body_limit_action == BodyLimitAction::Reject {
            return Err(EngineError::BodyLimitExceeded {
                limit: body.limit(),
                seen: body.total_seen(),
            });
        }
        Ok(())
    }
}

fn category_score(tag: &str) -> Option<&'static str> {
    match tag {
        "attack-sqli" => Some(SQL_INJECTION_SCORE),
        "attack-xss" => Some(XSS_SCORE),
        "attack-rfi" => Some(RFI_SCORE),
        "attack-lfi" => Some(LFI_SCORE),
        "attack-rce" => Some(RCE_SCORE),
        "attack-injection-php" => Some(PHP_INJECTION_SCORE),
        "attack-protocol" => Some(HTTP_VIOLATION_SCORE),
        "attack-fixation" => Some(SESSION_FIXATION_SCORE),
        _ => None,
    }
}

impl Transaction for PatternTransaction {
    fn process_connection(
        &mut self,
        client: &str,
        _client_port: u16,
        _server: &str,
        _server_port: u16,
    ) {
        self.client_ip = client.to_string();
    }

    fn process_uri(&mut self, uri: &str, _method: &str, _protocol: &str) {
        self.uri = uri.to_string();
    }

    fn add_request_header(&mut self, name: &str, value: &str) {
        self.request_headers.push((name.to_string(), value.to_string()));
    }

    fn process_request_headers(&mut self) {
        self.evaluate(RulePhase::RequestHeaders);
    }

    fn request_body_writer(&mut self) -> &mut dyn Write {
        &mut self.request_body
    }

    fn process_request_body(&mut self) -> Result<(), EngineError> {
        self.check_limit(&self.request_body)?;
        self.evaluate(RulePhase::RequestBody);
        Ok(())
    }

    fn add_response_header(&mut self, name: &str, value: &str) {
        self.response_headers.push((name.to_string(), value.to_string()));
    }

    fn process_response_headers(&mut self, status: u16, _protocol: &str) {
        self.status = status;
        self.evaluate(RulePhase::ResponseHeaders);
    }

    fn response_body_writer(&mut self) -> &mut dyn Write {
        &mut self.response_body
    }

    fn is_processable_response_body(&self) -> bool {
        if !self.rules.response_body_access {
            return false;
        }
        let media = match Self::header(&self.response_headers, "Content-Type") {
            Some(ct) => ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase(),
            None => return false,
        };
        self.rules.response_mime_types.iter().any(|m| *m == media)
    }

    fn process_response_body(&mut self) -> Result<(), EngineError> {
        if !self.is_processable_response_body() {
            return Ok(());
        }
        self.check_limit(&self.response_body)?;
        self.evaluate(RulePhase::ResponseBody);
        Ok(())
    }

    fn matched_rules(&self) -> &[MatchedRule] {
        &self.matched
    }

    fn score(&self, name: &str) -> Option<i64> {
        self.scores.get(name).copied()
    }

    fn process_logging(&mut self) {
        if self.logged {
            return;
        }
        for rule in &self.matched {
            warn!("{}", rule.error_log());
        }
        self.logged = true;
    }

    fn clean(&mut self) {
        self.request_headers.clear();
        self.request_body.clear();
        self.response_headers.clear();
        self.response_body.clear();
        self.matched.clear();
        self.matched_ids.clear();
        self.scores.clear();
    }
}
