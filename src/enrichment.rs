//! Enrichment pipeline.
//!
//! A recorded exchange is read with [`RecordedMessage`](crate::record::RecordedMessage),
//! driven through one engine transaction phase by phase, and turned into an
//! ECS [`Document`](crate::ecs::Document).
//!
//! Components:
//! - [`Enricher`]: per-process entry point owning the engine and lookups.
//! - [`EnricherTransaction`]: one inspection, closed exactly once.
//! - [`TruncatedBuffer`], [`MimeSniffer`]: body capture leaves.
//! - `threat`, `document`: findings extraction and pure document assembly.

pub mod document;
pub mod enricher;
pub mod mime_sniffer;
pub mod threat;
pub mod transaction;
pub mod truncated_buffer;

pub use enricher::Enricher;
pub use mime_sniffer::MimeSniffer;
pub use transaction::{CapturedBody, EnricherTransaction, InspectionSettings};
pub use truncated_buffer::TruncatedBuffer;
