//! Keel Store - versioned resource store
//!
//! The single source of truth for declared state. Resources are keyed by
//! (kind, name); `put` mints monotonic generations and never rewrites prior
//! ones, so a running instance can pin the exact generation its environment
//! was materialized from. Each kind exposes a change feed that watch
//! subscriptions can resume from a cursor without losing events.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod traits;
pub mod watch;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryResourceStore;
pub use traits::{PutOutcome, ResourceStore};
pub use watch::{watch, WatchSubscription};
