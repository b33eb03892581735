//! Reconciler error types

use keel_store::StoreError;
use keel_types::GenerationRef;
use thiserror::Error;

/// Env materialization failures.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// A referenced Secret/ConfigMap (or a key inside one) does not exist.
    /// Recoverable: resolution succeeds once the missing resource is applied.
    #[error("unresolved references: {}", references.join(", "))]
    UnresolvedReference { references: Vec<String> },

    /// A pinned generation was garbage-collected before it could be read
    /// again. Recoverable by re-applying with a fresh generation.
    #[error("pinned generation collected: {reference}")]
    VersionPinned { reference: GenerationRef },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Container runtime failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("instance start failed: {0}")]
    StartFailed(String),

    #[error("instance stop failed: {0}")]
    StopFailed(String),
}

/// A single reconcile pass failure. Isolated per workload: one workload's
/// error never stops another workload's loop. Only a fatal store error
/// halts the supervisor.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] keel_registry::RegistryError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl ReconcileError {
    /// True only for store corruption, the one condition that halts
    /// reconciliation entirely.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(e) => e.is_fatal(),
            Self::Materialize(MaterializeError::Store(e)) => e.is_fatal(),
            _ => false,
        }
    }
}
