//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use keel_types::WorkloadPhase;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub paused: bool,
    pub halted: bool,
    pub stats: DaemonStats,
}

/// Control-plane statistics
#[derive(Debug, Serialize)]
pub struct DaemonStats {
    pub workloads: usize,
    pub steady_workloads: usize,
    pub degraded_workloads: usize,
    pub instances: usize,
    pub ready_instances: usize,
    pub services: usize,
    pub ingress_rules: usize,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> ApiResult<Json<DaemonStatusResponse>> {
    let workloads = state.supervisor.workload_states();
    let steady = workloads
        .iter()
        .filter(|w| w.phase == WorkloadPhase::Steady)
        .count();
    let degraded = workloads
        .iter()
        .filter(|w| w.phase == WorkloadPhase::Degraded)
        .count();

    let instances = state.registry.instances().list_all().await?;
    let ready = instances.iter().filter(|i| i.health.is_ready()).count();

    let status = if state.supervisor.is_halted() {
        "halted"
    } else {
        "ok"
    };

    Ok(Json(DaemonStatusResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        paused: state.supervisor.is_paused(),
        halted: state.supervisor.is_halted(),
        stats: DaemonStats {
            workloads: workloads.len(),
            steady_workloads: steady,
            degraded_workloads: degraded,
            instances: instances.len(),
            ready_instances: ready,
            services: state.registry.service_names().len(),
            ingress_rules: state.ingress.rule_count(),
        },
    }))
}
