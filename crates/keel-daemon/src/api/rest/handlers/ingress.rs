//! Ingress route resolution handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Query, State},
    Json,
};
use keel_ingress::ResolvedRoute;
use serde::Deserialize;

/// Route query params
#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    pub host: String,
    pub path: String,
}

/// Resolve (host, path) to a service and one Ready endpoint. No matching
/// rule is a 404; a matched rule without a live endpoint is a 503.
pub async fn resolve_route(
    State(state): State<AppState>,
    Query(query): Query<RouteQuery>,
) -> ApiResult<Json<ResolvedRoute>> {
    let resolved = state.ingress.resolve(&query.host, &query.path)?;
    Ok(Json(resolved))
}
