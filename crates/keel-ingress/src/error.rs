//! Ingress error types

use thiserror::Error;

/// Errors surfaced at the routing boundary. Neither is retried
/// internally; both belong to the caller.
#[derive(Debug, Clone, Error)]
pub enum IngressError {
    /// No declared rule covers this (host, path).
    #[error("no matching rule for {host}{path}")]
    NoMatchingRule { host: String, path: String },

    /// A rule matched, but the target service has no Ready endpoint or is
    /// not declared.
    #[error("service unavailable: {service}")]
    ServiceUnavailable { service: String },
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, IngressError>;
