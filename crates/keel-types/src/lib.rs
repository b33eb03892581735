//! Keel Types - Core types for the deployment orchestrator
//!
//! Keel is a minimal declarative deployment orchestrator: operators apply
//! resource documents (secrets, config, workloads, services, ingress rules)
//! and the control plane drives running state to match them.
//!
//! ## Architectural Boundaries
//!
//! - **Store** owns: declared resources, generations, change feed
//! - **Reconciler** owns: workload instances and their lifecycle
//! - **Registry** owns: the observed instance set and endpoint snapshots
//! - **Ingress** owns: mapping external (host, path) to services
//!
//! ## Key Concepts
//!
//! - **Resource**: A declared (kind, name) document with a generation number
//! - **Workload**: A spec for a replicated process, owner of Instances
//! - **Instance**: One running unit satisfying a Workload's replica count
//! - **Generation**: Monotonic version counter per resource name
//! - **Events**: Unified observability stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod instance;
pub mod manifest;
pub mod resource;
pub mod spec;
pub mod state;

// Re-export main types
pub use events::{EventSeverity, EventSource, KeelEvent, KeelEventEnvelope};
pub use ids::InstanceId;
pub use instance::{Endpoint, Instance, InstanceHealth, LABEL_TEMPLATE_HASH, LABEL_WORKLOAD};
pub use manifest::{parse_manifest, ManifestDoc, ManifestError};
pub use resource::{
    ChangeEvent, ChangeKind, GenerationRef, Resource, ResourceKey, ResourceKind, ResourceSpec,
};
pub use spec::{
    ConfigMapSpec, EnvBinding, EnvSource, IngressRuleSpec, SecretSpec, ServiceSpec,
    SpecValidationError, WorkloadSpec,
};
pub use state::{WorkloadPhase, WorkloadState};
