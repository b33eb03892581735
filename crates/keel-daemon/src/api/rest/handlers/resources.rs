//! Resource document handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use keel_types::{parse_manifest, KeelEvent, Resource, ResourceKey, ResourceKind, ResourceSpec};
use serde::{Deserialize, Serialize};

/// Placeholder returned instead of secret values.
const REDACTED: &str = "<redacted>";

/// Outcome of applying one manifest document
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub kind: String,
    pub name: String,
    pub generation: u64,
    pub created: bool,
    pub changed: bool,
}

/// Apply response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub applied: Vec<ApplyOutcome>,
}

/// Apply a YAML manifest of one or more documents
pub async fn apply_manifest(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<ApplyResponse>> {
    let docs = parse_manifest(&body)?;
    if docs.is_empty() {
        return Err(ApiError::BadRequest(
            "manifest contains no documents".to_string(),
        ));
    }

    // Decode and validate every document before the first put, so a bad
    // document rejects the whole manifest instead of half-applying it.
    let mut decoded = Vec::with_capacity(docs.len());
    for doc in docs {
        decoded.push(doc.into_spec()?);
    }

    let mut applied = Vec::with_capacity(decoded.len());
    for (name, spec) in decoded {
        let kind = spec.kind();
        let outcome = state.store.put(&name, spec).await?;

        if outcome.changed {
            state.emit(KeelEvent::ResourceApplied {
                key: ResourceKey::new(kind, &name),
                generation: outcome.generation,
                created: outcome.created,
            });
        }
        tracing::info!(
            kind = %kind,
            name = %name,
            generation = outcome.generation,
            changed = outcome.changed,
            "applied resource"
        );

        applied.push(ApplyOutcome {
            kind: kind.to_string(),
            name,
            generation: outcome.generation,
            created: outcome.created,
            changed: outcome.changed,
        });
    }

    Ok(Json(ApplyResponse { applied }))
}

/// List all current resources of a kind
pub async fn list_resources(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<Resource>>> {
    let kind = parse_kind(&kind)?;
    let resources = state.store.list(kind).await?;
    Ok(Json(resources.into_iter().map(redacted).collect()))
}

/// Get the current generation of a resource
pub async fn get_resource(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<Json<Resource>> {
    let kind = parse_kind(&kind)?;
    let resource = state.store.get(kind, &name).await?;
    Ok(Json(redacted(resource)))
}

/// Delete resource response
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResourceResponse {
    pub deleted: bool,
}

/// Delete a resource by kind and name
pub async fn delete_resource(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<Json<DeleteResourceResponse>> {
    let kind = parse_kind(&kind)?;
    state.store.delete(kind, &name).await?;

    state.emit(KeelEvent::ResourceDeleted {
        key: ResourceKey::new(kind, &name),
    });
    tracing::info!(%kind, name = %name, "deleted resource");

    Ok(Json(DeleteResourceResponse { deleted: true }))
}

fn parse_kind(kind: &str) -> ApiResult<ResourceKind> {
    kind.parse()
        .map_err(|e: keel_types::resource::UnknownKind| ApiError::BadRequest(e.to_string()))
}

/// Secret values never leave the daemon; responses carry key names only.
fn redacted(mut resource: Resource) -> Resource {
    if let ResourceSpec::Secret(spec) = &mut resource.spec {
        for value in spec.data.values_mut() {
            *value = REDACTED.to_string();
        }
    }
    resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::SecretSpec;
    use std::collections::BTreeMap;

    #[test]
    fn test_redaction_keeps_keys_and_hides_values() {
        let resource = Resource {
            key: ResourceKey::new(ResourceKind::Secret, "db-credentials"),
            generation: 1,
            spec: ResourceSpec::Secret(SecretSpec {
                data: BTreeMap::from([("password".to_string(), "hunter2".to_string())]),
            }),
            applied_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
        };

        let redacted = redacted(resource);
        match &redacted.spec {
            ResourceSpec::Secret(spec) => {
                assert_eq!(spec.data.get("password").map(String::as_str), Some(REDACTED));
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_non_secret_specs_pass_through() {
        let resource = Resource {
            key: ResourceKey::new(ResourceKind::ConfigMap, "app-settings"),
            generation: 1,
            spec: ResourceSpec::ConfigMap(keel_types::ConfigMapSpec {
                data: BTreeMap::from([("mode".to_string(), "fast".to_string())]),
            }),
            applied_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
        };

        let passed = redacted(resource);
        match &passed.spec {
            ResourceSpec::ConfigMap(spec) => {
                assert_eq!(spec.data.get("mode").map(String::as_str), Some("fast"));
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }
}
