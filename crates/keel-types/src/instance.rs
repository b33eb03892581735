//! Running instances and their health
//!
//! An instance is one running unit satisfying a workload's replica count.
//! It is owned exclusively by its workload: created during scale-up,
//! destroyed on scale-down, workload deletion, or after its start retry
//! budget is exhausted.

use crate::ids::InstanceId;
use crate::resource::GenerationRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label key every instance carries, set to its workload name.
pub const LABEL_WORKLOAD: &str = "workload";

/// Label key recording the workload template an instance was started from.
/// Instances whose hash no longer matches the current spec are replaced.
pub const LABEL_TEMPLATE_HASH: &str = "template-hash";

/// Health of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceHealth {
    /// Started but not yet serving.
    Pending,
    /// Serving; eligible for endpoint sets.
    Ready,
    /// Start or runtime failure; subject to the retry budget.
    Failed,
    /// Being stopped; never returned by service lookups.
    Terminating,
}

impl InstanceHealth {
    /// Eligible for a service endpoint set.
    pub fn is_ready(&self) -> bool {
        matches!(self, InstanceHealth::Ready)
    }

    /// Counts toward a workload's live replica total.
    pub fn is_live(&self) -> bool {
        matches!(self, InstanceHealth::Pending | InstanceHealth::Ready)
    }
}

impl fmt::Display for InstanceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceHealth::Pending => "Pending",
            InstanceHealth::Ready => "Ready",
            InstanceHealth::Failed => "Failed",
            InstanceHealth::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

/// A (network address, port) pair at which an instance is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One running unit of a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,

    /// Owning workload name.
    pub workload: String,

    /// Workload generation this instance was created from.
    pub workload_generation: u64,

    /// Labels matched by service selectors. Always includes
    /// `workload=<name>`.
    pub labels: BTreeMap<String, String>,

    /// Address the runtime reported for the process.
    pub address: String,

    /// Port the process listens on.
    pub port: u16,

    pub health: InstanceHealth,

    /// Secret/ConfigMap generations the environment was materialized from.
    /// Frozen at start time; a later update or delete of the source resource
    /// does not change a running instance.
    pub pins: Vec<GenerationRef>,

    pub started_at: DateTime<Utc>,
}

impl Instance {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            address: self.address.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_predicates() {
        assert!(InstanceHealth::Ready.is_ready());
        assert!(InstanceHealth::Ready.is_live());
        assert!(InstanceHealth::Pending.is_live());
        assert!(!InstanceHealth::Pending.is_ready());
        assert!(!InstanceHealth::Failed.is_live());
        assert!(!InstanceHealth::Terminating.is_live());
    }

    #[test]
    fn test_endpoint_display() {
        let ep = Endpoint {
            address: "127.0.0.1".to_string(),
            port: 8080,
        };
        assert_eq!(ep.to_string(), "127.0.0.1:8080");
    }
}
