//! Engine findings to threat indicators and score export.

use std::net::IpAddr;

use crate::ecs::{Confidence, Scores, ThreatEnrichment, ThreatIndicator, ThreatMatch};
use crate::engine::transaction::{
    MatchedRule, Transaction, HTTP_VIOLATION_SCORE, INBOUND_ANOMALY_SCORE, LFI_SCORE,
    OUTBOUND_ANOMALY_SCORE, PHP_INJECTION_SCORE, RCE_SCORE, RFI_SCORE, SESSION_FIXATION_SCORE,
    SQL_INJECTION_SCORE, XSS_SCORE,
};

pub const INDICATOR_TYPE: &str = "network-traffic";
pub const MATCH_TYPE: &str = "indicator_match_rule";
pub const MAX_ATOMIC_CHARS: usize = 200;

const ATTACK_PREFIX: &str = "attack-";
const PARANOIA_PREFIX: &str = "paranoia-level/";

/// Maps a paranoia level tag value onto an indicator confidence.
pub fn confidence_from_paranoia(level: &str) -> Confidence {
    match level.parse::<i8>() {
        Ok(1) => Confidence::High,
        Ok(2) => Confidence::Medium,
        Ok(3) | Ok(4) => Confidence::Low,
        _ => Confidence::NotSpecified,
    }
}

/// Confidence of a finding: the last non-empty `paranoia-level/` tag decides.
pub fn confidence_from_tags(tags: &[String]) -> Confidence {
    tags.iter()
        .filter_map(|t| t.strip_prefix(PARANOIA_PREFIX))
        .filter(|level| !level.is_empty())
        .last()
        .map(confidence_from_paranoia)
        .unwrap_or_default()
}

pub fn is_attack(tags: &[String]) -> bool {
    tags.iter().any(|t| t.starts_with(ATTACK_PREFIX))
}

/// First `max` characters of `value`.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Threat enrichments for the attack findings, in engine order.
pub fn extract_threats(rules: &[MatchedRule]) -> Vec<ThreatEnrichment> {
    rules
        .iter()
        .filter(|r| is_attack(&r.rule.tags))
        .map(|r| ThreatEnrichment {
            indicator: ThreatIndicator {
                indicator_type: INDICATOR_TYPE.to_string(),
                description: r.error_log(),
                ip: r.client_ip.parse::<IpAddr>().ok(),
                confidence: confidence_from_tags(&r.rule.tags),
                provider: r.rule.version.clone(),
            },
            matched: ThreatMatch {
                atomic: truncate_chars(&r.matched_data.value, MAX_ATOMIC_CHARS),
                field: r.matched_data.variable_name.clone(),
                match_type: MATCH_TYPE.to_string(),
            },
        })
        .collect()
}

/// Reads the anomaly counters of a transaction.
pub fn scores_from(tx: &dyn Transaction) -> Scores {
    let score = |name: &str| tx.score(name).unwrap_or(0);
    Scores {
        inbound_anomaly: score(INBOUND_ANOMALY_SCORE),
        outbound_anomaly: score(OUTBOUND_ANOMALY_SCORE),
        sql_injection: score(SQL_INJECTION_SCORE),
        xss: score(XSS_SCORE),
        rfi: score(RFI_SCORE),
        lfi: score(LFI_SCORE),
        rce: score(RCE_SCORE),
        php_injection: score(PHP_INJECTION_SCORE),
        http_violation: score(HTTP_VIOLATION_SCORE),
        session_fixation: score(SESSION_FIXATION_SCORE),
    }
}
