use super::types::*;
use crate::error_handling::types::ConfigError;
use ipnetwork::IpNetwork;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read once at startup from a TOML file and is never
/// mutated afterwards; the engine and every inspection receive read-only views
/// of it.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use crs_offline::configuration::config::Config;
///
/// let config = Config::from_file(Path::new("crs-offline.toml")).unwrap();
/// println!("Serving on port {}", config.server.port);
/// ```
///
/// # Fields Overview
///
/// - `server`: address and port of the analysis API
/// - `storage`: directory holding the recorded exchanges
/// - `inspection`: per-inspection deadline and sniff window
/// - `engine`: body limits, response body access and the rule set
/// - `enrichment`: toggles for optional document enrichments
/// - `geo`: CIDR table used for client geo location
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub inspection: InspectionConfig,
    pub engine: EngineConfig,
    pub enrichment: EnrichmentConfig,
    pub geo: GeoConfig,
}

impl Config {
    /// Reads and validates the configuration at `path`.
    ///
    /// Rule files listed under `engine.rule_files` are resolved relative to the
    /// directory of `path` and appended to the inline `[[engine.rules]]`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&raw)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let files = config.engine.rule_files.clone();
        for file in files {
            let file = if file.is_absolute() { file } else { base.join(file) };
            let rules = Self::read_rule_file(&file)?;
            debug!("Loaded {} rules from {}", rules.len(), file.display());
            config.engine.rules.extend(rules);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from TOML text without touching rule files.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    fn read_rule_file(path: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let file: RuleFile =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        Ok(file.rules)
    }

    /// Checks value ranges that the TOML schema alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::NotInRange("server.port must not be 0".into()));
        }
        if self.engine.request_body_limit == 0 || self.engine.response_body_limit == 0 {
            return Err(ConfigError::NotInRange(
                "engine body limits must be greater than 0".into(),
            ));
        }
        if self.inspection.sniff_window == 0 {
            return Err(ConfigError::NotInRange(
                "inspection.sniff_window must be greater than 0".into(),
            ));
        }
        for rule in &self.engine.rules {
            if rule.targets.is_empty() {
                return Err(ConfigError::InvalidRule(format!(
                    "rule {} has no targets",
                    rule.id
                )));
            }
        }
        for network in &self.geo.networks {
            network
                .cidr
                .parse::<IpNetwork>()
                .map_err(|e| ConfigError::BadCidr(format!("{}: {}", network.cidr, e)))?;
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        match self.inspection.read_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
