//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Resources
        .route("/resources/apply", post(handlers::apply_manifest))
        .route("/resources/:kind", get(handlers::list_resources))
        .route("/resources/:kind/:name", get(handlers::get_resource))
        .route("/resources/:kind/:name", delete(handlers::delete_resource))
        // Workloads
        .route("/workloads", get(handlers::list_workloads))
        .route("/workloads/:name", get(handlers::get_workload))
        .route("/workloads/:name/scale", post(handlers::scale_workload))
        // Instances
        .route("/instances", get(handlers::list_instances))
        // Services
        .route(
            "/services/:name/endpoints",
            get(handlers::get_service_endpoints),
        )
        // Ingress
        .route("/ingress/route", get(handlers::resolve_route))
        // Reconciler control
        .route("/reconciler/pause", post(handlers::pause_reconciler))
        .route("/reconciler/resume", post(handlers::resume_reconciler))
        // Events
        .route("/events/stream", get(handlers::stream_events));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use keel_ingress::IngressRouter;
    use keel_reconciler::{ReconcilerConfig, ReconcilerSupervisor, SimulatedRuntime};
    use keel_registry::{MemoryInstanceRegistry, ServiceRegistry};
    use keel_store::{MemoryResourceStore, ResourceStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    const MANIFEST: &str = r#"
apiVersion: keel/v1
kind: Secret
name: db-credentials
spec:
  data:
    password: hunter2
---
kind: Workload
name: api
spec:
  image: registry.local/api:1.4
  replicas: 2
  port: 8080
---
kind: Service
name: api
spec:
  selector:
    workload: api
  targetPort: 8080
---
kind: IngressRule
name: api-route
spec:
  host: shop.test
  pathPrefix: /api
  service: api
"#;

    fn test_state() -> AppState {
        let (event_tx, _) = broadcast::channel(64);
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        let registry = Arc::new(ServiceRegistry::new(Arc::new(
            MemoryInstanceRegistry::new(),
        )));
        let runtime = Arc::new(SimulatedRuntime::new(Duration::ZERO));
        let supervisor = ReconcilerSupervisor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            runtime,
            ReconcilerConfig::default(),
            event_tx.clone(),
        );
        let ingress = Arc::new(IngressRouter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        AppState::new(store, registry, supervisor, ingress, event_tx)
    }

    fn test_app() -> (Router, AppState) {
        let state = test_state();
        (create_router(state.clone(), true), state)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<(&str, &str)>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some((content_type, body)) => builder
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn apply(app: &Router, manifest: &str) -> serde_json::Value {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/v1/resources/apply",
            Some(("application/yaml", manifest)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _state) = test_app();
        let (status, body) = send(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_apply_manifest_applies_every_document() {
        let (app, _state) = test_app();
        let body = apply(&app, MANIFEST).await;

        let applied = body["applied"].as_array().unwrap();
        assert_eq!(applied.len(), 4);
        assert!(applied.iter().all(|o| o["created"] == true));
        assert!(applied.iter().all(|o| o["generation"] == 1));

        let (status, list) = send(&app, Method::GET, "/api/v1/resources/workloads", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let (app, _state) = test_app();
        apply(&app, MANIFEST).await;
        let body = apply(&app, MANIFEST).await;

        let applied = body["applied"].as_array().unwrap();
        assert!(applied.iter().all(|o| o["changed"] == false));
        assert!(applied.iter().all(|o| o["generation"] == 1));
    }

    #[tokio::test]
    async fn test_secret_values_are_redacted() {
        let (app, _state) = test_app();
        apply(&app, MANIFEST).await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/resources/secrets/db-credentials",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spec"]["spec"]["data"]["password"], "<redacted>");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_bad_request() {
        let (app, _state) = test_app();
        let (status, body) = send(&app, Method::GET, "/api/v1/resources/daemonsets", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_bad_request() {
        let (app, _state) = test_app();
        let manifest = "kind: Workload\nname: bad\nspec:\n  image: ''\n  replicas: 1\n  port: 80\n";
        let (status, _body) = send(
            &app,
            Method::POST,
            "/api/v1/resources/apply",
            Some(("application/yaml", manifest)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let (app, _state) = test_app();
        let (status, body) = send(&app, Method::GET, "/api/v1/resources/workloads/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_resource() {
        let (app, _state) = test_app();
        apply(&app, MANIFEST).await;

        let (status, body) = send(
            &app,
            Method::DELETE,
            "/api/v1/resources/workloads/api",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);

        let (status, _body) = send(&app, Method::GET, "/api/v1/resources/workloads/api", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scale_rewrites_the_workload_resource() {
        let (app, _state) = test_app();
        apply(&app, MANIFEST).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/workloads/api/scale",
            Some(("application/json", r#"{"replicas": 5}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generation"], 2);

        let (_, resource) = send(&app, Method::GET, "/api/v1/resources/workloads/api", None).await;
        assert_eq!(resource["spec"]["spec"]["replicas"], 5);
    }

    #[tokio::test]
    async fn test_scale_with_stale_generation_conflicts() {
        let (app, _state) = test_app();
        apply(&app, MANIFEST).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/workloads/api/scale",
            Some((
                "application/json",
                r#"{"replicas": 5, "expected_generation": 99}"#,
            )),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_route_resolution_distinguishes_503_from_404() {
        let (app, state) = test_app();
        apply(&app, MANIFEST).await;
        state.ingress.reload().await.unwrap();

        // Rule matches but nothing backs the service yet.
        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/ingress/route?host=shop.test&path=/api",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

        // No rule at all.
        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/ingress/route?host=shop.test&path=/nope",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    }

    #[tokio::test]
    async fn test_status_reports_paused() {
        let (app, _state) = test_app();

        let (status, body) = send(&app, Method::POST, "/api/v1/reconciler/pause", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paused"], true);

        let (status, body) = send(&app, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paused"], true);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_endpoints_for_unknown_service_is_not_found() {
        let (app, _state) = test_app();
        let (status, _body) = send(
            &app,
            Method::GET,
            "/api/v1/services/ghost/endpoints",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
