//! # Keel Registry
//!
//! Instance and service registries backing discovery and routing.
//!
//! Two layers:
//!
//! - [`InstanceRegistry`]: which instances exist, per workload, and what
//!   health each one reports.
//! - [`ServiceRegistry`]: which Ready instances currently back each logical
//!   service name, published as immutable [`EndpointSnapshot`]s.
//!
//! All instance mutations that should affect discovery flow through the
//! [`ServiceRegistry`], which keeps snapshots consistent with instance
//! health: a lookup either sees the set before a transition or the set
//! after it, never a partial update.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod endpoints;
pub mod error;
pub mod instance;

pub use endpoints::{EndpointSnapshot, ServiceRegistry};
pub use error::{RegistryError, Result};
pub use instance::{InstanceRegistry, MemoryInstanceRegistry};
