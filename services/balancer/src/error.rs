//! Error types for the balancer.

use thiserror::Error;

/// Errors that can occur when parsing a backend endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The endpoint string is empty.
    #[error("endpoint cannot be empty")]
    Empty,

    /// The endpoint has no `:port` suffix.
    #[error("endpoint missing port: '{0}'")]
    MissingPort(String),

    /// The host part is empty.
    #[error("endpoint missing host: '{0}'")]
    MissingHost(String),

    /// The port is not a valid non-zero u16.
    #[error("invalid port in endpoint '{endpoint}': {port}")]
    InvalidPort { endpoint: String, port: String },

    /// An IPv6 literal without its closing bracket.
    #[error("unterminated IPv6 literal in endpoint '{0}'")]
    UnterminatedBracket(String),
}

/// Configuration errors, reported before the listener starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No backends were configured.
    #[error("backend pool cannot be empty")]
    EmptyPool,

    /// A backend entry could not be parsed.
    #[error("invalid backend: {0}")]
    InvalidBackend(#[from] EndpointError),

    /// The listen address is not an IP address.
    #[error("invalid listen address '{0}'")]
    InvalidListenAddr(String),
}
