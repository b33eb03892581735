//! Workload status and scaling handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use keel_types::{KeelEvent, ResourceKey, ResourceKind, ResourceSpec, WorkloadState};
use serde::{Deserialize, Serialize};

/// List reconciliation state for every known workload
pub async fn list_workloads(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkloadState>>> {
    Ok(Json(state.supervisor.workload_states()))
}

/// Get reconciliation state for one workload
pub async fn get_workload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<WorkloadState>> {
    if let Some(workload_state) = state.supervisor.workload_state(&name) {
        return Ok(Json(workload_state));
    }

    // Declared but not yet reconciled: confirm the resource exists, then
    // report the cold Pending state rather than a 404.
    state.store.get(ResourceKind::Workload, &name).await?;
    Ok(Json(WorkloadState::new(&name)))
}

/// Scale request
#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleWorkloadRequest {
    pub replicas: u32,

    /// Optimistic concurrency guard: the scale fails with a conflict unless
    /// the workload's current generation matches.
    #[serde(default)]
    pub expected_generation: Option<u64>,
}

/// Scale response
#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleWorkloadResponse {
    pub workload: String,
    pub replicas: u32,
    pub generation: u64,
}

/// Rewrite a workload resource with a new replica count. This is a normal
/// `put`; the reconciler picks the change up from the workload feed.
pub async fn scale_workload(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ScaleWorkloadRequest>,
) -> ApiResult<Json<ScaleWorkloadResponse>> {
    let resource = state.store.get(ResourceKind::Workload, &name).await?;
    let mut spec = match resource.spec.as_workload() {
        Some(spec) => spec.clone(),
        None => {
            return Err(ApiError::Internal(format!(
                "workload/{name} holds a non-workload document"
            )))
        }
    };
    spec.replicas = request.replicas;

    let outcome = match request.expected_generation {
        Some(expected) => {
            state
                .store
                .put_if_current(&name, ResourceSpec::Workload(spec), expected)
                .await?
        }
        None => state.store.put(&name, ResourceSpec::Workload(spec)).await?,
    };

    if outcome.changed {
        state.emit(KeelEvent::ResourceApplied {
            key: ResourceKey::new(ResourceKind::Workload, &name),
            generation: outcome.generation,
            created: false,
        });
    }
    tracing::info!(
        workload = %name,
        replicas = request.replicas,
        generation = outcome.generation,
        "scaled workload"
    );

    Ok(Json(ScaleWorkloadResponse {
        workload: name,
        replicas: request.replicas,
        generation: outcome.generation,
    }))
}
