use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::AsyncRead;

use super::transaction::{EnricherTransaction, InspectionSettings};
use crate::configuration::Config;
use crate::ecs::Document;
use crate::engine::{InspectionEngine, PatternEngine};
use crate::error_handling::types::{ConfigError, InspectionError};
use crate::lookup::{GeoLookup, GeoTable, TokenUserAgentParser, UserAgentParser};

/// Process-wide entry point: owns the engine, the settings and the lookups.
///
/// Cheap to share behind an `Arc`; every call to
/// [`enrich_record`](Self::enrich_record) runs an independent inspection.
#[derive(Clone)]
pub struct Enricher {
    engine: Arc<dyn InspectionEngine>,
    settings: InspectionSettings,
    geo: Option<Arc<dyn GeoLookup>>,
    user_agent: Option<Arc<dyn UserAgentParser>>,
}

impl Enricher {
    pub fn new(engine: Arc<dyn InspectionEngine>, settings: InspectionSettings) -> Self {
        Self {
            engine,
            settings,
            geo: None,
            user_agent: None,
        }
    }

    /// Builds the bundled engine and lookups described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let engine = PatternEngine::new(&config.engine)?;
        info!("Inspection engine ready with {} rules", engine.rule_count());

        let mut enricher = Self::new(Arc::new(engine), InspectionSettings::from_config(config));
        if !config.geo.networks.is_empty() {
            enricher = enricher.with_geo(Arc::new(GeoTable::from_config(&config.geo)?));
        }
        if config.enrichment.user_agent {
            enricher = enricher.with_user_agent_parser(Arc::new(TokenUserAgentParser::new()));
        }
        Ok(enricher)
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_user_agent_parser(mut self, parser: Arc<dyn UserAgentParser>) -> Self {
        self.user_agent = Some(parser);
        self
    }

    pub fn settings(&self) -> &InspectionSettings {
        &self.settings
    }

    /// Opens an inspection session without running it.
    pub fn new_transaction<R: AsyncRead + Unpin>(&self, record: R) -> EnricherTransaction<R> {
        EnricherTransaction::new(self.engine.new_transaction(), record, self.settings.clone())
    }

    /// Runs both phases of `tx`, bounded by the configured read timeout.
    pub async fn inspect<R: AsyncRead + Unpin>(
        &self,
        tx: &mut EnricherTransaction<R>,
    ) -> Result<(), InspectionError> {
        let phases = async {
            tx.process_request().await?;
            tx.process_response().await?;
            Ok::<(), InspectionError>(())
        };
        match self.settings.read_timeout {
            Some(limit) => tokio::time::timeout(limit, phases)
                .await
                .map_err(|_| InspectionError::Timeout(limit))?,
            None => phases.await,
        }
    }

    /// Inspects one record and returns its document.
    ///
    /// The inspection is closed before returning, on success and on error.
    pub async fn enrich_record<R: AsyncRead + Unpin>(
        &self,
        record: R,
    ) -> Result<Document, InspectionError> {
        let mut tx = self.new_transaction(record);
        let result = match self.inspect(&mut tx).await {
            Ok(()) => tx.to_document(self.geo.as_deref(), self.user_agent.as_deref()),
            Err(e) => Err(e),
        };
        tx.close();

        match &result {
            Ok(doc) => debug!(
                "[{}] Document ready with {} threat enrichments",
                tx.id(),
                doc.threat.as_ref().map(|t| t.enrichments.len()).unwrap_or(0)
            ),
            Err(e) => warn!("[{}] Inspection failed: {}", tx.id(), e),
        }
        result
    }
}
