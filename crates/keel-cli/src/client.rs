//! HTTP client for the keel daemon

use crate::error::{CliError, CliResult};
use keel_types::{Endpoint, Instance, KeelEventEnvelope, Resource, ResourceKind, WorkloadState};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::VecDeque;

/// HTTP client for communicating with the keel daemon
pub struct KeelClient {
    client: Client,
    base_url: String,
}

/// Daemon status response
#[derive(Debug, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,
    /// Uptime string
    pub uptime: String,
    /// Whether reconciliation is paused
    pub paused: bool,
    /// Whether the reconciler halted
    pub halted: bool,
    /// Control-plane counts
    pub stats: DaemonStats,
}

/// Control-plane counts reported by the daemon
#[derive(Debug, Deserialize)]
pub struct DaemonStats {
    pub workloads: usize,
    pub steady_workloads: usize,
    pub degraded_workloads: usize,
    pub instances: usize,
    pub ready_instances: usize,
    pub services: usize,
    pub ingress_rules: usize,
}

/// Outcome of applying one manifest document
#[derive(Debug, Deserialize)]
pub struct ApplyOutcome {
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Generation after the apply
    pub generation: u64,
    /// Whether the name was created by this apply
    pub created: bool,
    /// Whether the document differed from the current generation
    pub changed: bool,
}

/// Response for a manifest apply
#[derive(Debug, Deserialize)]
pub struct ApplyResponse {
    /// Per-document outcomes, in manifest order
    pub applied: Vec<ApplyOutcome>,
}

/// Response for a resource deletion
#[derive(Debug, Deserialize)]
pub struct DeleteOutcome {
    /// Whether the resource existed
    pub deleted: bool,
}

/// Response for a workload scale
#[derive(Debug, Deserialize)]
pub struct ScaleOutcome {
    /// Workload name
    pub workload: String,
    /// New desired replica count
    pub replicas: u32,
    /// Generation the scale produced
    pub generation: u64,
}

/// Ready endpoints of one service
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    /// Service name
    pub service: String,
    /// Snapshot publication counter
    pub version: u64,
    /// Ready endpoints, oldest instance first
    pub endpoints: Vec<Endpoint>,
}

/// The ingress rule that won a route query
#[derive(Debug, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Target service name
    pub service: String,
    /// Host the winning rule was declared for
    pub host: String,
    /// Path prefix of the winning rule
    pub path_prefix: String,
}

/// A route decision plus one live endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolvedRoute {
    /// The winning rule
    pub decision: RouteDecision,
    /// Endpoint picked from the target service
    pub endpoint: Endpoint,
}

/// Reconciler control flags
#[derive(Debug, Deserialize)]
pub struct ReconcilerStatus {
    /// Whether the reconciler halted on a fatal store error
    pub halted: bool,
}

impl KeelClient {
    /// Create a new client for the given daemon endpoint
    pub fn new(endpoint: &str) -> CliResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Daemon status including reconciler flags and object counts
    pub async fn daemon_status(&self) -> CliResult<DaemonStatus> {
        self.get("/api/v1/status").await
    }

    // ========== Resource API ==========

    /// Apply a multi-document YAML manifest. The daemon validates every
    /// document before applying any of them.
    pub async fn apply_manifest(&self, manifest: &str) -> CliResult<ApplyResponse> {
        let url = format!("{}/api/v1/resources/apply", self.base_url);
        let response = self
            .client
            .post(&url)
            .body(manifest.to_string())
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// List resources of one kind
    pub async fn list_resources(&self, kind: ResourceKind) -> CliResult<Vec<Resource>> {
        self.get(&format!("/api/v1/resources/{}", kind)).await
    }

    /// Get the current generation of one resource
    pub async fn get_resource(&self, kind: ResourceKind, name: &str) -> CliResult<Resource> {
        self.get(&format!("/api/v1/resources/{}/{}", kind, name))
            .await
    }

    /// Delete one resource
    pub async fn delete_resource(&self, kind: ResourceKind, name: &str) -> CliResult<DeleteOutcome> {
        self.delete(&format!("/api/v1/resources/{}/{}", kind, name))
            .await
    }

    // ========== Workload API ==========

    /// List reconciliation state for all workloads
    pub async fn list_workloads(&self) -> CliResult<Vec<WorkloadState>> {
        self.get("/api/v1/workloads").await
    }

    /// Get reconciliation state for one workload
    pub async fn get_workload(&self, name: &str) -> CliResult<WorkloadState> {
        self.get(&format!("/api/v1/workloads/{}", name)).await
    }

    /// Scale a workload. With `expected_generation` the daemon rejects the
    /// scale if someone else applied a newer generation in between.
    pub async fn scale_workload(
        &self,
        name: &str,
        replicas: u32,
        expected_generation: Option<u64>,
    ) -> CliResult<ScaleOutcome> {
        self.post(
            &format!("/api/v1/workloads/{}/scale", name),
            &serde_json::json!({
                "replicas": replicas,
                "expected_generation": expected_generation,
            }),
        )
        .await
    }

    // ========== Instance and service API ==========

    /// List instances, optionally filtered by owning workload
    pub async fn list_instances(&self, workload: Option<&str>) -> CliResult<Vec<Instance>> {
        let url = match workload {
            Some(workload) => format!("/api/v1/instances?workload={}", workload),
            None => "/api/v1/instances".to_string(),
        };
        self.get(&url).await
    }

    /// Current endpoint snapshot of a service
    pub async fn service_endpoints(&self, service: &str) -> CliResult<ServiceEndpoints> {
        self.get(&format!("/api/v1/services/{}/endpoints", service))
            .await
    }

    // ========== Ingress API ==========

    /// Resolve (host, path) to a service and one Ready endpoint
    pub async fn resolve_route(&self, host: &str, path: &str) -> CliResult<ResolvedRoute> {
        let url = format!("{}/api/v1/ingress/route", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("host", host), ("path", path)])
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ========== Reconciler API ==========

    /// Pause reconciliation globally
    pub async fn pause(&self) -> CliResult<ReconcilerStatus> {
        self.post("/api/v1/reconciler/pause", &serde_json::json!({}))
            .await
    }

    /// Resume reconciliation and trigger a catch-up pass
    pub async fn resume(&self) -> CliResult<ReconcilerStatus> {
        self.post("/api/v1/reconciler/resume", &serde_json::json!({}))
            .await
    }

    // ========== Events API ==========

    /// Stream control-plane events from the daemon. The SSE byte stream is
    /// re-framed into `data:` lines; keep-alive pings and comments are
    /// dropped here.
    pub async fn stream_events(
        &self,
    ) -> CliResult<impl futures_util::Stream<Item = CliResult<KeelEventEnvelope>>> {
        use futures_util::StreamExt;

        let response = self
            .client
            .get(format!("{}/api/v1/events/stream", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response.text().await.unwrap_or_default());
            return Err(CliError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let stream = futures_util::stream::unfold(
            (response.bytes_stream(), String::new(), VecDeque::new()),
            |(mut bytes, mut buffer, mut ready)| async move {
                loop {
                    if let Some(event) = ready.pop_front() {
                        return Some((event, (bytes, buffer, ready)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                            ready.extend(drain_sse_events(&mut buffer));
                        }
                        Some(Err(e)) => ready.push_back(Err(CliError::from(e))),
                        None => return None,
                    }
                }
            },
        );

        Ok(stream)
    }

    // ========== Internal HTTP helpers ==========

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CliResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> CliResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        self.handle_response(response).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> CliResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.delete(&url).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> CliResult<T> {
        let status = response.status();

        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = error_message(response.text().await.unwrap_or_default());
            if status == StatusCode::NOT_FOUND {
                Err(CliError::NotFound(message))
            } else {
                Err(CliError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Pull the `error` field out of a daemon error body, falling back to the
/// raw text.
fn error_message(body: String) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.is_empty() => "no error detail".to_string(),
        Err(_) => body,
    }
}

/// Pull complete `data:` lines out of the buffer, leaving any partial
/// trailing line in place for the next chunk.
fn drain_sse_events(buffer: &mut String) -> Vec<CliResult<KeelEventEnvelope>> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() && data != "ping" {
                events.push(serde_json::from_str(data).map_err(CliError::from));
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{EventSource, KeelEvent};

    #[test]
    fn test_client_endpoint_normalization() {
        let client = KeelClient::new("http://127.0.0.1:7300/").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:7300");

        let client = KeelClient::new("http://127.0.0.1:7300").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:7300");
    }

    #[test]
    fn test_error_message_prefers_error_field() {
        let body = r#"{"error":"resource Workload/api not found","code":"NOT_FOUND"}"#;
        assert_eq!(
            error_message(body.to_string()),
            "resource Workload/api not found"
        );
    }

    #[test]
    fn test_error_message_falls_back_to_raw_text() {
        assert_eq!(error_message("gateway timeout".to_string()), "gateway timeout");
        assert_eq!(error_message(String::new()), "no error detail");
    }

    #[test]
    fn test_drain_sse_events_parses_data_lines() {
        let envelope = KeelEventEnvelope::new(KeelEvent::ReconcilerPaused, EventSource::Api);
        let mut buffer = format!(
            "data: {}\n\ndata: ping\n",
            serde_json::to_string(&envelope).unwrap()
        );

        let events = drain_sse_events(&mut buffer);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_sse_events_keeps_partial_line() {
        let mut buffer = String::from(": lagged\ndata: {\"partial\"");
        let events = drain_sse_events(&mut buffer);
        assert!(events.is_empty());
        assert_eq!(buffer, "data: {\"partial\"");
    }
}
