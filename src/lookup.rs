//! Optional context lookups used during document assembly.
//!
//! Both providers are best effort: a failed lookup only omits the field.

pub mod geo;
pub mod user_agent;

use std::net::IpAddr;

use crate::ecs::{Geo, UserAgent};
use crate::error_handling::types::LookupError;

pub use geo::GeoTable;
pub use user_agent::TokenUserAgentParser;

/// IP to location provider.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<Geo, LookupError>;
}

/// User-Agent string breakdown provider.
pub trait UserAgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> Result<UserAgent, LookupError>;
}
