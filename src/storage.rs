//! Storage subsystem
//!
//! This module provides access to recorded exchanges kept outside the process.
//!
//! Components:
//! - `storage_trait`: the RecordStorage trait defining a uniform API.
//! - `file_storage`: filesystem-backed implementation rooted at the records directory.

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use storage_trait::{RecordReader, RecordStorage};
