pub mod types;

pub use types::{
    ConfigError, EngineError, InspectionError, LookupError, Phase, RecordError, StorageError,
    WebError,
};
