//! Storage Trait
//!
//! This module defines the `RecordStorage` trait, which provides an interface for
//! record retrieval backends.
//!
//! Implementors of this trait are responsible for:
//! - Resolving record keys to byte streams
//! - Listing the records available for inspection
//! - Rejecting keys that would escape the backend's namespace
//!
//! All methods return a `Result` to handle potential storage errors.

use tokio::io::AsyncRead;

use crate::error_handling::types::StorageError;

/// Byte stream of one recorded exchange.
pub type RecordReader = Box<dyn AsyncRead + Send + Unpin>;

/// The `RecordStorage` trait defines the interface for record retrieval backends.
pub trait RecordStorage: Send + Sync {
    /// Opens the record stored under `key` for streaming.
    ///
    /// - `key` - Backend-relative record name, `/` separated.
    fn open_record(&self, key: &str) -> Result<RecordReader, StorageError>;

    /// Lists every record key, sorted.
    fn list_records(&self) -> Result<Vec<String>, StorageError>;
}
