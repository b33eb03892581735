//! Event types for keel observability
//!
//! Events provide a unified stream of control-plane activity: resource
//! changes, workload phase transitions, instance lifecycle, and endpoint
//! publications.

use crate::ids::{EventId, InstanceId};
use crate::resource::ResourceKey;
use crate::state::WorkloadPhase;
use serde::{Deserialize, Serialize};

/// Envelope wrapping all keel events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeelEventEnvelope {
    /// Unique event ID
    pub id: EventId,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Component that emitted the event
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: KeelEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Resource store
    Store,
    /// Reconciler supervisor or a workload worker
    Reconciler,
    /// Instance/service registry
    Registry,
    /// Ingress router
    Ingress,
    /// Operator API
    Api,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Keel events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeelEvent {
    // ═══════════════════════════════════════════════════════════════════
    // RESOURCE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A resource document was applied
    ResourceApplied {
        key: ResourceKey,
        generation: u64,
        created: bool,
    },

    /// A resource was deleted
    ResourceDeleted {
        key: ResourceKey,
    },

    /// Garbage collection removed unpinned generations
    GenerationsCollected {
        collected: u64,
    },

    // ═══════════════════════════════════════════════════════════════════
    // WORKLOAD EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A workload moved to a new phase
    WorkloadPhaseChanged {
        workload: String,
        from: WorkloadPhase,
        to: WorkloadPhase,
        message: Option<String>,
    },

    /// One reconcile pass failed; the workload will be retried
    ReconcilePassFailed {
        workload: String,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INSTANCE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Instance created for a workload generation
    InstanceCreated {
        instance_id: InstanceId,
        workload: String,
        generation: u64,
    },

    /// Instance passed its readiness check
    InstanceReady {
        instance_id: InstanceId,
    },

    /// Instance health regressed to Failed; it will be replaced
    InstanceFailed {
        instance_id: InstanceId,
        workload: String,
    },

    /// Instance start failed; consumed one attempt from the retry budget
    InstanceStartFailed {
        workload: String,
        attempt: u32,
        reason: String,
    },

    /// Instance retired (scale-down, replacement, or workload deletion)
    InstanceRetired {
        instance_id: InstanceId,
        workload: String,
    },

    /// Instance exceeded its stop grace period and was force-terminated
    InstanceForceTerminated {
        instance_id: InstanceId,
        workload: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // REGISTRY EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A service's endpoint snapshot was republished
    EndpointsPublished {
        service: String,
        version: u64,
        endpoints: usize,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INGRESS EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// The ingress rule table was rebuilt
    RulesReloaded {
        rules: usize,
    },

    // ═══════════════════════════════════════════════════════════════════
    // RECONCILER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Reconciliation paused by an operator
    ReconcilerPaused,

    /// Reconciliation resumed
    ReconcilerResumed,

    /// Reconciliation halted on an unrecoverable store error
    ReconcilerHalted {
        reason: String,
    },
}

impl KeelEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: KeelEvent, source: EventSource) -> Self {
        Self {
            id: EventId::generate(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            event,
        }
    }

    /// Infer severity from event type
    fn infer_severity(event: &KeelEvent) -> EventSeverity {
        match event {
            KeelEvent::ReconcilerHalted { .. } => EventSeverity::Critical,

            KeelEvent::WorkloadPhaseChanged {
                to: WorkloadPhase::Degraded,
                ..
            }
            | KeelEvent::ReconcilePassFailed { .. } => EventSeverity::Error,

            KeelEvent::InstanceStartFailed { .. }
            | KeelEvent::InstanceFailed { .. }
            | KeelEvent::InstanceForceTerminated { .. }
            | KeelEvent::ReconcilerPaused => EventSeverity::Warning,

            _ => EventSeverity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn test_degraded_transition_is_error() {
        let envelope = KeelEventEnvelope::new(
            KeelEvent::WorkloadPhaseChanged {
                workload: "api".to_string(),
                from: WorkloadPhase::Scaling,
                to: WorkloadPhase::Degraded,
                message: Some("start attempts exhausted".to_string()),
            },
            EventSource::Reconciler,
        );
        assert_eq!(envelope.severity, EventSeverity::Error);
    }

    #[test]
    fn test_apply_is_info() {
        let envelope = KeelEventEnvelope::new(
            KeelEvent::ResourceApplied {
                key: ResourceKey::new(ResourceKind::Workload, "api"),
                generation: 1,
                created: true,
            },
            EventSource::Api,
        );
        assert_eq!(envelope.severity, EventSeverity::Info);
    }

    #[test]
    fn test_envelope_serializes() {
        let envelope = KeelEventEnvelope::new(KeelEvent::ReconcilerPaused, EventSource::Api);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("ReconcilerPaused"));
    }
}
