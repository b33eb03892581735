//! Instance listing handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Query, State},
    Json,
};
use keel_types::Instance;
use serde::Deserialize;

/// List instances query params
#[derive(Debug, Deserialize)]
pub struct ListInstancesQuery {
    pub workload: Option<String>,
}

/// List running instances, optionally filtered by owning workload
pub async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<ListInstancesQuery>,
) -> ApiResult<Json<Vec<Instance>>> {
    let instances = match query.workload {
        Some(workload) => {
            state
                .registry
                .instances()
                .list_for_workload(&workload)
                .await?
        }
        None => {
            let mut all = state.registry.instances().list_all().await?;
            all.sort_by(|a, b| {
                a.workload
                    .cmp(&b.workload)
                    .then(a.started_at.cmp(&b.started_at))
            });
            all
        }
    };
    Ok(Json(instances))
}
