//! Declared resources and their change feed
//!
//! Every declared object is a [`Resource`]: a (kind, name) key, a monotonic
//! generation, and a kind-specific spec document. Exactly one generation is
//! current per key; prior generations stay retrievable while pinned by a
//! running instance.

use crate::spec::{ConfigMapSpec, IngressRuleSpec, SecretSpec, ServiceSpec, WorkloadSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five declarable resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Secret,
    ConfigMap,
    Workload,
    Service,
    IngressRule,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
        ResourceKind::Workload,
        ResourceKind::Service,
        ResourceKind::IngressRule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "Secret",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Workload => "Workload",
            ResourceKind::Service => "Service",
            ResourceKind::IngressRule => "IngressRule",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    /// Accepts the canonical kind name plus the lowercase/plural operator
    /// spellings (`secrets`, `configmaps`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secret" | "secrets" => Ok(ResourceKind::Secret),
            "configmap" | "configmaps" => Ok(ResourceKind::ConfigMap),
            "workload" | "workloads" => Ok(ResourceKind::Workload),
            "service" | "services" => Ok(ResourceKind::Service),
            "ingressrule" | "ingressrules" => Ok(ResourceKind::IngressRule),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// Error for unrecognized kind names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

/// Unique key of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Kind-tagged spec document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ResourceSpec {
    Secret(SecretSpec),
    ConfigMap(ConfigMapSpec),
    Workload(WorkloadSpec),
    Service(ServiceSpec),
    IngressRule(IngressRuleSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Secret(_) => ResourceKind::Secret,
            ResourceSpec::ConfigMap(_) => ResourceKind::ConfigMap,
            ResourceSpec::Workload(_) => ResourceKind::Workload,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::IngressRule(_) => ResourceKind::IngressRule,
        }
    }

    pub fn as_workload(&self) -> Option<&WorkloadSpec> {
        match self {
            ResourceSpec::Workload(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceSpec> {
        match self {
            ResourceSpec::Service(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_ingress_rule(&self) -> Option<&IngressRuleSpec> {
        match self {
            ResourceSpec::IngressRule(spec) => Some(spec),
            _ => None,
        }
    }
}

/// A declared resource at a specific generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub key: ResourceKey,
    /// Monotonic version counter, starts at 1 on first apply.
    pub generation: u64,
    pub spec: ResourceSpec,
    /// When this generation was applied.
    pub applied_at: DateTime<Utc>,
    /// When the name was first applied. Stable across generations; used for
    /// declaration-order tie-breaks.
    pub created_at: DateTime<Utc>,
}

/// Reference to one specific generation of a named resource.
///
/// Instances hold these for every Secret/ConfigMap their environment was
/// materialized from; the store keeps a pinned generation retrievable until
/// the last reference is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationRef {
    pub kind: ResourceKind,
    pub name: String,
    pub generation: u64,
}

impl fmt::Display for GenerationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.name, self.generation)
    }
}

/// What happened to a resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One entry in a kind's change feed.
///
/// `cursor` is a per-kind monotonic sequence number; watch subscriptions
/// resume from a cursor and see every change at or after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub cursor: u64,
    pub key: ResourceKey,
    /// Generation the change produced (for `Deleted`, the last current one).
    pub generation: u64,
    pub change: ChangeKind,
    pub at: DateTime<Utc>,
}
