//! Error taxonomy for the registry, pool, and proxy engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the durable key registry.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum RegistryError {
    /// No key with the given id exists.
    #[error("key {0} not found")]
    NotFound(i64),

    /// The credential string is already registered.
    #[error("credential already registered")]
    Duplicate,

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl RegistryError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Errors surfaced by the in-memory key pool.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolError {
    /// No eligible key could be supplied before the caller's deadline.
    #[error("key pool: no available keys")]
    NoKeysAvailable,
}

/// Errors produced while executing a client request against the upstream.
///
/// Everything here is locally recovered by rotating keys until the retry
/// budget is exhausted; only the final error of the attempt loop escapes.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// The pool could not supply a key before the deadline.
    #[error("no API keys available")]
    NoKeysAvailable,

    /// Upstream answered with a 4xx (429 included). The raw body is kept so
    /// the final attempt's error can be relayed to the client verbatim.
    #[error("upstream rejected request (HTTP {status})")]
    UpstreamRejected {
        /// HTTP status code returned by the upstream
        status: u16,
        /// Raw upstream response body
        body: String,
    },

    /// Network failure or upstream 5xx; blameless to the key.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// Internal engine error (bugs, unexpected states).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    /// HTTP status the front-end should answer with when this error
    /// terminates a request before any byte reached the client.
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NoKeysAvailable => 503,
            Self::UpstreamRejected { status, .. } => *status,
            Self::UpstreamUnavailable { .. } => 502,
            Self::Internal { .. } => 500,
        }
    }
}

impl From<PoolError> for ProxyError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoKeysAvailable => Self::NoKeysAvailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_codes() {
        assert_eq!(ProxyError::NoKeysAvailable.http_status_code(), 503);
        assert_eq!(
            ProxyError::UpstreamRejected { status: 429, body: String::new() }.http_status_code(),
            429
        );
        assert_eq!(
            ProxyError::UpstreamUnavailable { message: "connect refused".into() }
                .http_status_code(),
            502
        );
    }

    #[test]
    fn test_pool_error_converts() {
        let err: ProxyError = PoolError::NoKeysAvailable.into();
        assert_eq!(err, ProxyError::NoKeysAvailable);
    }
}
