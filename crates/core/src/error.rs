//! Engine error types
//!
//! Every request-level failure carries a stable [`ErrorCode`] so that
//! collaborators (HTTP layer, CLI) can map it without parsing messages.

use crate::feeds::FetchError;

/// Stable error classification for collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Station, profile, city or date not found
    NotFound,
    /// Echoed snapshot did not match its integrity token
    IntegrityMismatch,
    /// Malformed request parameter
    InvalidParameter,
    /// Upstream service failed and nothing was cached
    Upstream,
    /// Outbound rate limit hit and nothing was cached
    RateLimited,
    /// Missing or invalid configuration (startup only)
    Config,
    /// Dataset could not be read, decrypted or parsed (startup only)
    Dataset,
}

/// Errors surfaced by [`crate::engine::Engine`] operations
#[derive(Debug)]
pub enum EngineError {
    /// Something the request named does not exist; carries the reason
    NotFound(String),
    /// Snapshot token verification failed for the named station
    IntegrityMismatch(String),
    InvalidParameter(String),
    /// Upstream failure with no cached fallback
    Upstream(FetchError),
    /// Rate limited with no cached fallback; names the service
    RateLimited(&'static str),
    Config(String),
    Dataset(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::IntegrityMismatch(_) => ErrorCode::IntegrityMismatch,
            EngineError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            EngineError::Upstream(_) => ErrorCode::Upstream,
            EngineError::RateLimited(_) => ErrorCode::RateLimited,
            EngineError::Config(_) => ErrorCode::Config,
            EngineError::Dataset(_) => ErrorCode::Dataset,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(msg) => write!(f, "Not found: {msg}"),
            EngineError::IntegrityMismatch(station) => {
                write!(f, "Integrity token does not match snapshot for station '{station}'")
            }
            EngineError::InvalidParameter(msg) => write!(f, "Invalid parameter: {msg}"),
            EngineError::Upstream(e) => write!(f, "Upstream unavailable: {e}"),
            EngineError::RateLimited(service) => {
                write!(f, "Rate limit reached for {service} and no cached data available")
            }
            EngineError::Config(msg) => write!(f, "Configuration error: {msg}"),
            EngineError::Dataset(msg) => write!(f, "Dataset error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FetchError> for EngineError {
    fn from(e: FetchError) -> Self {
        EngineError::Upstream(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_for_not_found_and_integrity() {
        let nf = EngineError::NotFound("station 'X'".into());
        let im = EngineError::IntegrityMismatch("X".into());
        assert_ne!(nf.code(), im.code());
        assert_eq!(nf.to_string(), "Not found: station 'X'");
    }

    #[test]
    fn test_upstream_has_source() {
        use std::error::Error;
        let e = EngineError::from(FetchError::Timeout);
        assert_eq!(e.code(), ErrorCode::Upstream);
        assert!(e.source().is_some());
    }
}
