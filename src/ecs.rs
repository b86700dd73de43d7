//! Elastic Common Schema document produced for one recorded exchange.
//!
//! Only the fields the enrichment pipeline fills are modelled; absent values
//! are skipped on serialization.

pub mod document;

pub use document::{
    BasicDocument, Body, ClientEndpoint, Confidence, Crs, Device, Document, Ecs, Event, Geo,
    GeoPoint, Http, HttpRequest, HttpResponse, Os, Scores, Threat, ThreatEnrichment,
    ThreatIndicator, ThreatMatch, Url, User, UserAgent, ECS_VERSION,
};
