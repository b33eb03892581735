//! Registry error types

use keel_types::InstanceId;
use thiserror::Error;

/// Errors from registry operations
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Instance not found
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// Instance already registered
    #[error("instance already registered: {0}")]
    InstanceAlreadyExists(InstanceId),

    /// No service declared under this name
    #[error("service not found: {0}")]
    ServiceNotFound(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
