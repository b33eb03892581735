//! Service endpoint handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use keel_registry::EndpointSnapshot;

/// Get the current endpoint snapshot for a service
pub async fn get_service_endpoints(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<EndpointSnapshot>> {
    let snapshot = state.registry.lookup(&name)?;
    Ok(Json((*snapshot).clone()))
}
