pub mod configuration;
pub use configuration::Config;

pub mod ecs;

pub mod engine;

pub mod enrichment;
pub use enrichment::{Enricher, EnricherTransaction, InspectionSettings};

pub mod error_handling;

pub mod lookup;

pub mod record;

pub mod storage;

pub mod web_interface;
