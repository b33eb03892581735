//! Service registry: endpoint snapshots
//!
//! A service is a live view, never an owner: its endpoint set is computed
//! from Ready instances matching the selector and published as an immutable
//! snapshot. One health transition produces at most one snapshot swap per
//! affected service, so concurrent lookups never observe a
//! shrink-then-grow flicker, and a mid-Terminating instance is never
//! returned.

use crate::error::{RegistryError, Result};
use crate::instance::InstanceRegistry;
use dashmap::DashMap;
use keel_types::{
    Endpoint, EventSource, Instance, InstanceHealth, InstanceId, KeelEvent, KeelEventEnvelope,
    ServiceSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Immutable, versioned endpoint set of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub service: String,

    /// Monotonic publication counter across all services.
    pub version: u64,

    /// Ready endpoints, oldest instance first.
    pub endpoints: Vec<Endpoint>,
}

/// Maps logical service names to the Ready endpoints backing them.
pub struct ServiceRegistry {
    instances: Arc<dyn InstanceRegistry>,
    services: DashMap<String, ServiceSpec>,
    snapshots: RwLock<HashMap<String, Arc<EndpointSnapshot>>>,
    version: AtomicU64,
    round_robin: AtomicU64,
    event_tx: Option<broadcast::Sender<KeelEventEnvelope>>,
}

impl ServiceRegistry {
    pub fn new(instances: Arc<dyn InstanceRegistry>) -> Self {
        Self {
            instances,
            services: DashMap::new(),
            snapshots: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            round_robin: AtomicU64::new(0),
            event_tx: None,
        }
    }

    /// Attach the observability stream.
    pub fn with_events(mut self, event_tx: broadcast::Sender<KeelEventEnvelope>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// The instance registry snapshots are computed from. Read-only use;
    /// mutations go through this registry so snapshots stay consistent.
    pub fn instances(&self) -> &Arc<dyn InstanceRegistry> {
        &self.instances
    }

    fn emit(&self, event: KeelEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(KeelEventEnvelope::new(event, EventSource::Registry));
        }
    }

    fn snapshots_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<EndpointSnapshot>>> {
        self.snapshots.read().unwrap_or_else(|p| p.into_inner())
    }

    fn snapshots_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<EndpointSnapshot>>> {
        self.snapshots.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Declare or update a service. Recomputes its snapshot immediately.
    pub async fn upsert_service(&self, name: impl Into<String>, spec: ServiceSpec) -> Result<()> {
        let name = name.into();
        self.services.insert(name.clone(), spec);
        self.recompute(&name).await
    }

    /// Remove a service and its snapshot.
    pub fn remove_service(&self, name: &str) {
        self.services.remove(name);
        self.snapshots_write().remove(name);
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    /// Register an instance and bring affected snapshots up to date.
    pub async fn register_instance(&self, instance: Instance) -> Result<()> {
        let labels = instance.labels.clone();
        self.instances.register(instance).await?;
        self.recompute_matching(&labels).await
    }

    /// Apply a health transition and republish affected services.
    ///
    /// The transition is one event: each affected service gets exactly one
    /// snapshot swap, and only when its endpoint set actually changed.
    pub async fn publish(&self, instance_id: &InstanceId, health: InstanceHealth) -> Result<()> {
        let updated = self.instances.set_health(instance_id, health).await?;
        self.recompute_matching(&updated.labels).await
    }

    /// Remove an instance and republish affected services.
    pub async fn retire_instance(&self, instance_id: &InstanceId) -> Result<Option<Instance>> {
        let removed = self.instances.remove(instance_id).await?;
        if let Some(instance) = &removed {
            self.recompute_matching(&instance.labels).await?;
        }
        Ok(removed)
    }

    /// Current snapshot for a service.
    pub fn lookup(&self, service: &str) -> Result<Arc<EndpointSnapshot>> {
        if let Some(snapshot) = self.snapshots_read().get(service) {
            return Ok(snapshot.clone());
        }
        Err(RegistryError::ServiceNotFound(service.to_string()))
    }

    /// One endpoint from the snapshot, rotating round-robin. `None` when the
    /// service has no Ready endpoints.
    pub fn pick(&self, service: &str) -> Result<Option<Endpoint>> {
        let snapshot = self.lookup(service)?;
        if snapshot.endpoints.is_empty() {
            return Ok(None);
        }
        let idx = self.round_robin.fetch_add(1, Ordering::SeqCst) as usize;
        Ok(Some(snapshot.endpoints[idx % snapshot.endpoints.len()].clone()))
    }

    async fn recompute_matching(
        &self,
        labels: &std::collections::BTreeMap<String, String>,
    ) -> Result<()> {
        let affected: Vec<String> = self
            .services
            .iter()
            .filter(|entry| entry.value().matches(labels))
            .map(|entry| entry.key().clone())
            .collect();
        for service in affected {
            self.recompute(&service).await?;
        }
        Ok(())
    }

    async fn recompute(&self, service: &str) -> Result<()> {
        let spec = match self.services.get(service) {
            Some(spec) => spec.clone(),
            // Removed concurrently; nothing to publish.
            None => return Ok(()),
        };

        let mut matching: Vec<Instance> = self
            .instances
            .list_all()
            .await?
            .into_iter()
            .filter(|i| i.health.is_ready() && spec.matches(&i.labels))
            .collect();
        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));

        let endpoints: Vec<Endpoint> = matching
            .into_iter()
            .map(|i| Endpoint {
                address: i.address,
                port: spec.target_port,
            })
            .collect();

        let mut snapshots = self.snapshots_write();
        let unchanged = snapshots
            .get(service)
            .map(|s| s.endpoints == endpoints)
            .unwrap_or(false);
        if unchanged {
            return Ok(());
        }

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let count = endpoints.len();
        snapshots.insert(
            service.to_string(),
            Arc::new(EndpointSnapshot {
                service: service.to_string(),
                version,
                endpoints,
            }),
        );
        drop(snapshots);

        debug!(service, version, count, "endpoint snapshot published");
        self.emit(KeelEvent::EndpointsPublished {
            service: service.to_string(),
            version,
            endpoints: count,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::MemoryInstanceRegistry;
    use std::collections::BTreeMap;

    fn spec(workload: &str) -> ServiceSpec {
        ServiceSpec {
            selector: BTreeMap::from([("workload".to_string(), workload.to_string())]),
            target_port: 9000,
        }
    }

    fn instance(workload: &str, health: InstanceHealth) -> Instance {
        Instance {
            id: InstanceId::generate(),
            workload: workload.to_string(),
            workload_generation: 1,
            labels: BTreeMap::from([("workload".to_string(), workload.to_string())]),
            address: "127.0.0.1".to_string(),
            port: 8080,
            health,
            pins: Vec::new(),
            started_at: chrono::Utc::now(),
        }
    }

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(MemoryInstanceRegistry::new()))
    }

    #[tokio::test]
    async fn test_lookup_returns_only_ready_instances() {
        let registry = registry();
        registry.upsert_service("api", spec("api")).await.unwrap();

        registry
            .register_instance(instance("api", InstanceHealth::Ready))
            .await
            .unwrap();
        registry
            .register_instance(instance("api", InstanceHealth::Pending))
            .await
            .unwrap();

        let snapshot = registry.lookup("api").unwrap();
        assert_eq!(snapshot.endpoints.len(), 1);
        assert_eq!(snapshot.endpoints[0].port, 9000);
    }

    #[tokio::test]
    async fn test_terminating_instance_leaves_snapshot() {
        let registry = registry();
        registry.upsert_service("api", spec("api")).await.unwrap();

        let inst = instance("api", InstanceHealth::Ready);
        let id = inst.id;
        registry.register_instance(inst).await.unwrap();
        assert_eq!(registry.lookup("api").unwrap().endpoints.len(), 1);

        registry
            .publish(&id, InstanceHealth::Terminating)
            .await
            .unwrap();
        assert!(registry.lookup("api").unwrap().endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_one_transition_one_publication() {
        let (tx, mut rx) = broadcast::channel(16);
        let registry = ServiceRegistry::new(Arc::new(MemoryInstanceRegistry::new())).with_events(tx);
        registry.upsert_service("api", spec("api")).await.unwrap();

        let inst = instance("api", InstanceHealth::Pending);
        let id = inst.id;
        registry.register_instance(inst).await.unwrap();

        registry.publish(&id, InstanceHealth::Ready).await.unwrap();

        let mut publications = 0;
        while let Ok(envelope) = rx.try_recv() {
            if matches!(envelope.event, KeelEvent::EndpointsPublished { .. }) {
                publications += 1;
            }
        }
        // Register (Pending, no endpoint change) emits nothing; the Ready
        // transition publishes exactly once.
        assert_eq!(publications, 1);
    }

    #[tokio::test]
    async fn test_selector_ignores_other_workloads() {
        let registry = registry();
        registry.upsert_service("api", spec("api")).await.unwrap();

        registry
            .register_instance(instance("worker", InstanceHealth::Ready))
            .await
            .unwrap();
        assert!(registry.lookup("api").unwrap().endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_pick_round_robins() {
        let registry = registry();
        registry.upsert_service("api", spec("api")).await.unwrap();

        let mut a = instance("api", InstanceHealth::Ready);
        a.address = "10.0.0.1".to_string();
        a.started_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let mut b = instance("api", InstanceHealth::Ready);
        b.address = "10.0.0.2".to_string();

        registry.register_instance(a).await.unwrap();
        registry.register_instance(b).await.unwrap();

        let first = registry.pick("api").unwrap().unwrap();
        let second = registry.pick("api").unwrap().unwrap();
        assert_ne!(first.address, second.address);
    }

    #[tokio::test]
    async fn test_unknown_service_is_an_error() {
        let registry = registry();
        assert!(matches!(
            registry.lookup("ghost"),
            Err(RegistryError::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retirement_shrinks_snapshot() {
        let registry = registry();
        registry.upsert_service("api", spec("api")).await.unwrap();

        let keep = instance("api", InstanceHealth::Ready);
        let go = instance("api", InstanceHealth::Ready);
        let go_id = go.id;
        registry.register_instance(keep).await.unwrap();
        registry.register_instance(go).await.unwrap();
        assert_eq!(registry.lookup("api").unwrap().endpoints.len(), 2);

        registry.retire_instance(&go_id).await.unwrap();
        assert_eq!(registry.lookup("api").unwrap().endpoints.len(), 1);
    }
}
