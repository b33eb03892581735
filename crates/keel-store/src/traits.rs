//! Resource store trait definition
//!
//! The store is the single source of truth for declared state. Every
//! mutation goes through `put`/`delete`; no component writes resources any
//! other way. Each kind has its own change feed: a monotonic cursor, a
//! replayable log, and a live broadcast channel.

use crate::error::StoreResult;
use async_trait::async_trait;
use keel_types::{ChangeEvent, GenerationRef, Resource, ResourceKind, ResourceSpec};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Result of a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    /// The current generation after this call.
    pub generation: u64,

    /// True when the name did not exist before.
    pub created: bool,

    /// False when the applied content was identical to the current
    /// generation; no new generation was minted and no event emitted.
    pub changed: bool,
}

/// Versioned table of declared resources keyed by (kind, name).
///
/// `put` on an existing name mints a new generation and never mutates prior
/// ones; a prior generation stays retrievable while pinned by a running
/// instance, then is garbage-collected.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Apply a spec under a name. Re-applying identical content is
    /// idempotent: the generation is not bumped and no event is emitted.
    async fn put(&self, name: &str, spec: ResourceSpec) -> StoreResult<PutOutcome>;

    /// `put` that fails with `Conflict` unless the current generation equals
    /// `expected_generation`.
    async fn put_if_current(
        &self,
        name: &str,
        spec: ResourceSpec,
        expected_generation: u64,
    ) -> StoreResult<PutOutcome>;

    /// Latest resource under the key, or `NotFound`.
    async fn get(&self, kind: ResourceKind, name: &str) -> StoreResult<Resource>;

    /// A specific generation, current or pinned. `GenerationCollected` when
    /// it existed once but GC removed it.
    async fn get_generation(
        &self,
        kind: ResourceKind,
        name: &str,
        generation: u64,
    ) -> StoreResult<Resource>;

    /// All current resources of a kind, in declaration order (first applied
    /// first).
    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<Resource>>;

    /// Delete the name. Pinned generations survive until unpinned; `get`
    /// reports `NotFound` immediately.
    async fn delete(&self, kind: ResourceKind, name: &str) -> StoreResult<()>;

    /// Take a reference on a generation, keeping it retrievable past
    /// updates and deletes.
    async fn pin(&self, gen_ref: &GenerationRef) -> StoreResult<()>;

    /// Drop a reference. Unpinning an already-collected generation is a
    /// no-op.
    async fn unpin(&self, gen_ref: &GenerationRef) -> StoreResult<()>;

    /// Remove all non-current, unpinned generations. Returns how many were
    /// collected.
    async fn collect_garbage(&self) -> StoreResult<u64>;

    /// Live change feed for a kind. Pair with `changes_since` to resume
    /// without loss; see [`crate::watch`].
    fn subscribe(&self, kind: ResourceKind) -> broadcast::Receiver<ChangeEvent>;

    /// Replay all changes with cursor >= `cursor`, oldest first.
    async fn changes_since(&self, kind: ResourceKind, cursor: u64) -> StoreResult<Vec<ChangeEvent>>;

    /// Cursor one past the latest change of this kind.
    async fn next_cursor(&self, kind: ResourceKind) -> StoreResult<u64>;
}
