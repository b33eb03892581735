//! Application state for API handlers

use keel_ingress::IngressRouter;
use keel_reconciler::ReconcilerSupervisor;
use keel_registry::ServiceRegistry;
use keel_store::ResourceStore;
use keel_types::{EventSource, KeelEvent, KeelEventEnvelope};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Declared-state store
    pub store: Arc<dyn ResourceStore>,

    /// Service registry over the observed instance set
    pub registry: Arc<ServiceRegistry>,

    /// Reconciler supervisor handle
    pub supervisor: Arc<ReconcilerSupervisor>,

    /// Ingress router
    pub ingress: Arc<IngressRouter>,

    /// Event broadcast channel
    pub event_tx: broadcast::Sender<KeelEventEnvelope>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: Arc<ServiceRegistry>,
        supervisor: Arc<ReconcilerSupervisor>,
        ingress: Arc<IngressRouter>,
        event_tx: broadcast::Sender<KeelEventEnvelope>,
    ) -> Self {
        Self {
            store,
            registry,
            supervisor,
            ingress,
            event_tx,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Emit an operator-surface event onto the broadcast bus.
    pub fn emit(&self, event: KeelEvent) {
        let _ = self
            .event_tx
            .send(KeelEventEnvelope::new(event, EventSource::Api));
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
