//! Recorded-message reader.
//!
//! Components:
//! - `types`: heads, header multimap and capture context.
//! - `reader`: `RecordedMessage`, the sequential request-then-response parser.

pub mod reader;
pub mod types;

pub use reader::RecordedMessage;
pub use types::{
    ConnectionInfo, Credential, Durations, Endpoint, HeaderMap, HttpVersion, RecordContext,
    RequestHead, ResponseHead, Span,
};
