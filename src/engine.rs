//! Inspection engine seam and the bundled rule engine.

pub mod pattern_engine;
pub mod transaction;

pub use pattern_engine::PatternEngine;
pub use transaction::{InspectionEngine, MatchData, MatchedRule, RuleInfo, Transaction};
