use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidRule(String),
    BadCidr(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidRule(e) => write!(f, "Rule configuration error: {}", e),
            ConfigError::BadCidr(e) => write!(f, "CIDR formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures while reconstructing the request/response pair from a record.
#[derive(Debug)]
pub enum RecordError {
    IoError(std::io::Error),
    MalformedContext(String),
    MalformedHead(String),
    HeadTooLarge(usize),
    IncompleteHead,
    MalformedChunk(String),
    TruncatedBody,
    /// The response was requested while the request body was still unread.
    OutOfOrder(&'static str),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::IoError(e) => write!(f, "Record IO error: {}", e),
            RecordError::MalformedContext(e) => write!(f, "Malformed record context: {}", e),
            RecordError::MalformedHead(e) => write!(f, "Malformed HTTP head: {}", e),
            RecordError::HeadTooLarge(max) => {
                write!(f, "HTTP head exceeds the maximum of {} bytes", max)
            }
            RecordError::IncompleteHead => write!(f, "Unexpected end of record inside HTTP head"),
            RecordError::MalformedChunk(e) => write!(f, "Malformed chunked body: {}", e),
            RecordError::TruncatedBody => write!(f, "Unexpected end of record inside HTTP body"),
            RecordError::OutOfOrder(e) => write!(f, "Record accessed out of order: {}", e),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        RecordError::IoError(err)
    }
}

#[derive(Debug)]
pub enum EngineError {
    BodyLimitExceeded { limit: usize, seen: u64 },
    ProcessingFailed(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BodyLimitExceeded { limit, seen } => write!(
                f,
                "Body of {} bytes exceeds the engine limit of {} bytes",
                seen, limit
            ),
            EngineError::ProcessingFailed(e) => write!(f, "Engine processing failed: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

/// Steps of the inspection protocol, in the order they are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connection,
    Uri,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connection => "connection",
            Phase::Uri => "uri",
            Phase::RequestHeaders => "request headers",
            Phase::RequestBody => "request body",
            Phase::ResponseHeaders => "response headers",
            Phase::ResponseBody => "response body",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum InspectionError {
    Framing(Phase, RecordError),
    Io(Phase, std::io::Error),
    Engine(Phase, EngineError),
    Timeout(Duration),
    NotProcessed,
}

impl InspectionError {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            InspectionError::Framing(p, _)
            | InspectionError::Io(p, _)
            | InspectionError::Engine(p, _) => Some(*p),
            InspectionError::Timeout(_) | InspectionError::NotProcessed => None,
        }
    }

    pub(crate) fn from_record(phase: Phase, err: RecordError) -> Self {
        match err {
            RecordError::IoError(e) => InspectionError::Io(phase, e),
            other => InspectionError::Framing(phase, other),
        }
    }
}

impl fmt::Display for InspectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InspectionError::Framing(p, e) => write!(f, "error in {} phase: {}", p, e),
            InspectionError::Io(p, e) => write!(f, "error copying {}: {}", p, e),
            InspectionError::Engine(p, e) => write!(f, "error processing {}: {}", p, e),
            InspectionError::Timeout(d) => {
                write!(f, "inspection did not complete within {:?}", d)
            }
            InspectionError::NotProcessed => {
                write!(f, "must process request and response first")
            }
        }
    }
}

impl std::error::Error for InspectionError {}

/// Optional enrichment lookups (geo, user agent). Never fatal.
#[derive(Debug)]
pub enum LookupError {
    NotFound,
    Unrecognized(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::NotFound => write!(f, "No lookup entry found"),
            LookupError::Unrecognized(e) => write!(f, "Unrecognized lookup input: {}", e),
        }
    }
}

impl std::error::Error for LookupError {}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    ReadFailed,
    NotFound(String),
    InvalidKey(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::NotFound(e) => write!(f, "Record not found: {}", e),
            StorageError::InvalidKey(e) => write!(f, "Invalid record key: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum WebError {
    BadAddress(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BadAddress(e) => write!(f, "Invalid bind address: {}", e),
        }
    }
}

impl std::error::Error for WebError {}
