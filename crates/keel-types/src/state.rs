//! Per-workload reconciliation state
//!
//! The reconciler tracks one [`WorkloadState`] per workload name. The phase
//! machine is strict: a workload never leaves `Pending` until every
//! referenced Secret/ConfigMap resolves, and only deletion moves it to
//! `Terminating`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a workload in its reconciliation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    /// Declared, but at least one env reference does not resolve.
    Pending,
    /// References resolved; environment is being materialized.
    Materializing,
    /// Creating or retiring instances to match the replica count.
    Scaling,
    /// Observed state equals desired state.
    Steady,
    /// Start retries exhausted for this generation; no auto-retry until a
    /// new generation is applied.
    Degraded,
    /// Resource deleted; instances are being stopped.
    Terminating,
    /// All instances destroyed; the state entry is about to be dropped.
    Gone,
}

impl WorkloadPhase {
    /// Phases that accept new desired-state changes.
    pub fn is_active(&self) -> bool {
        !matches!(self, WorkloadPhase::Terminating | WorkloadPhase::Gone)
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Materializing => "Materializing",
            WorkloadPhase::Scaling => "Scaling",
            WorkloadPhase::Steady => "Steady",
            WorkloadPhase::Degraded => "Degraded",
            WorkloadPhase::Terminating => "Terminating",
            WorkloadPhase::Gone => "Gone",
        };
        f.write_str(s)
    }
}

/// Observable reconciliation state of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub workload: String,
    pub phase: WorkloadPhase,

    /// Workload generation the reconciler last acted on.
    pub observed_generation: u64,

    pub desired_replicas: u32,

    /// Instances currently Pending or Ready.
    pub live_replicas: u32,

    /// Instances currently Ready.
    pub ready_replicas: u32,

    /// Start attempts consumed for the observed generation.
    pub start_attempts: u32,

    /// Human-readable detail: the unresolved reference for Pending, the
    /// exhausted budget for Degraded.
    pub message: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl WorkloadState {
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            phase: WorkloadPhase::Pending,
            observed_generation: 0,
            desired_replicas: 0,
            live_replicas: 0,
            ready_replicas: 0,
            start_attempts: 0,
            message: None,
            updated_at: Utc::now(),
        }
    }

    /// Move to a new phase, clearing any stale message.
    pub fn advance(&mut self, phase: WorkloadPhase) {
        self.phase = phase;
        self.message = None;
        self.updated_at = Utc::now();
    }

    /// Move to a new phase with an explanatory message.
    pub fn advance_with(&mut self, phase: WorkloadPhase, message: impl Into<String>) {
        self.phase = phase;
        self.message = Some(message.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_activity() {
        assert!(WorkloadPhase::Pending.is_active());
        assert!(WorkloadPhase::Degraded.is_active());
        assert!(!WorkloadPhase::Terminating.is_active());
        assert!(!WorkloadPhase::Gone.is_active());
    }

    #[test]
    fn test_advance_clears_message() {
        let mut state = WorkloadState::new("api");
        state.advance_with(WorkloadPhase::Pending, "missing Secret/db-credentials");
        assert!(state.message.is_some());

        state.advance(WorkloadPhase::Materializing);
        assert_eq!(state.phase, WorkloadPhase::Materializing);
        assert!(state.message.is_none());
    }
}
