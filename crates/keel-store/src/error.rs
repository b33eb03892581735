//! Store error types

use keel_types::{ResourceKey, ResourceKind};
use thiserror::Error;

/// Errors from resource store operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No current resource under this key
    #[error("resource not found: {key}")]
    NotFound { key: ResourceKey },

    /// The requested generation existed once but was garbage-collected
    #[error("generation {generation} of {key} has been collected")]
    GenerationCollected { key: ResourceKey, generation: u64 },

    /// Compare-and-set failed: the current generation moved
    #[error("conflict on {key}: expected generation {expected}, current is {actual}")]
    Conflict {
        key: ResourceKey,
        expected: u64,
        actual: u64,
    },

    /// Internal invariant violated. Unrecoverable; reconciliation halts.
    #[error("store corruption: {0}")]
    Corruption(String),
}

impl StoreError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            key: ResourceKey::new(kind, name),
        }
    }

    /// True for the only error class that must stop the control loops.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corruption(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
