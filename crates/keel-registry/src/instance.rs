//! Instance registry
//!
//! The observed-state table: every running instance is registered here by
//! the reconciler and indexed by owning workload. Health updates flow
//! through [`crate::endpoints::ServiceRegistry::publish`] so endpoint
//! snapshots stay consistent with this table.

use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use keel_types::{Instance, InstanceHealth, InstanceId};

/// Registry of running instances
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// Register a new instance
    async fn register(&self, instance: Instance) -> Result<()>;

    /// Get an instance by ID
    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>>;

    /// List all instances
    async fn list_all(&self) -> Result<Vec<Instance>>;

    /// List instances owned by a workload
    async fn list_for_workload(&self, workload: &str) -> Result<Vec<Instance>>;

    /// Update health, returning the updated instance
    async fn set_health(&self, id: &InstanceId, health: InstanceHealth) -> Result<Instance>;

    /// Remove an instance, returning it if present
    async fn remove(&self, id: &InstanceId) -> Result<Option<Instance>>;

    /// Count of Pending-or-Ready instances for a workload
    async fn count_live_for_workload(&self, workload: &str) -> Result<u32>;
}

/// In-memory instance registry
pub struct MemoryInstanceRegistry {
    instances: DashMap<InstanceId, Instance>,
    by_workload: DashMap<String, Vec<InstanceId>>,
}

impl MemoryInstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            by_workload: DashMap::new(),
        }
    }
}

impl Default for MemoryInstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceRegistry for MemoryInstanceRegistry {
    async fn register(&self, instance: Instance) -> Result<()> {
        let id = instance.id;
        let workload = instance.workload.clone();

        if self.instances.contains_key(&id) {
            return Err(RegistryError::InstanceAlreadyExists(id));
        }

        self.instances.insert(id, instance);

        // Index by workload
        self.by_workload.entry(workload).or_default().push(id);

        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>> {
        Ok(self.instances.get(id).map(|i| i.clone()))
    }

    async fn list_all(&self) -> Result<Vec<Instance>> {
        Ok(self.instances.iter().map(|i| i.value().clone()).collect())
    }

    async fn list_for_workload(&self, workload: &str) -> Result<Vec<Instance>> {
        let mut result = Vec::new();
        if let Some(ids) = self.by_workload.get(workload) {
            for id in ids.iter() {
                if let Some(instance) = self.instances.get(id) {
                    result.push(instance.clone());
                }
            }
        }
        // Oldest first; scale-down retirement relies on this order.
        result.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn set_health(&self, id: &InstanceId, health: InstanceHealth) -> Result<Instance> {
        if let Some(mut instance) = self.instances.get_mut(id) {
            instance.health = health;
            Ok(instance.clone())
        } else {
            Err(RegistryError::InstanceNotFound(*id))
        }
    }

    async fn remove(&self, id: &InstanceId) -> Result<Option<Instance>> {
        if let Some((_, instance)) = self.instances.remove(id) {
            // Remove from workload index
            if let Some(mut ids) = self.by_workload.get_mut(&instance.workload) {
                ids.retain(|i| i != id);
            }
            Ok(Some(instance))
        } else {
            Ok(None)
        }
    }

    async fn count_live_for_workload(&self, workload: &str) -> Result<u32> {
        let mut count = 0;
        if let Some(ids) = self.by_workload.get(workload) {
            for id in ids.iter() {
                if let Some(instance) = self.instances.get(id) {
                    if instance.health.is_live() {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn instance(workload: &str) -> Instance {
        Instance {
            id: InstanceId::generate(),
            workload: workload.to_string(),
            workload_generation: 1,
            labels: BTreeMap::from([("workload".to_string(), workload.to_string())]),
            address: "127.0.0.1".to_string(),
            port: 8080,
            health: InstanceHealth::Pending,
            pins: Vec::new(),
            started_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = MemoryInstanceRegistry::new();
        let inst = instance("api");
        let id = inst.id;
        registry.register(inst).await.unwrap();

        assert!(registry.get(&id).await.unwrap().is_some());
        assert_eq!(registry.list_for_workload("api").await.unwrap().len(), 1);
        assert_eq!(registry.list_for_workload("other").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = MemoryInstanceRegistry::new();
        let inst = instance("api");
        registry.register(inst.clone()).await.unwrap();
        assert!(matches!(
            registry.register(inst).await,
            Err(RegistryError::InstanceAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_cleans_index() {
        let registry = MemoryInstanceRegistry::new();
        let inst = instance("api");
        let id = inst.id;
        registry.register(inst).await.unwrap();

        let removed = registry.remove(&id).await.unwrap();
        assert!(removed.is_some());
        assert!(registry.list_for_workload("api").await.unwrap().is_empty());
        assert_eq!(registry.count_live_for_workload("api").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_count_excludes_failed() {
        let registry = MemoryInstanceRegistry::new();
        let a = instance("api");
        let b = instance("api");
        let b_id = b.id;
        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();

        registry
            .set_health(&b_id, InstanceHealth::Failed)
            .await
            .unwrap();
        assert_eq!(registry.count_live_for_workload("api").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_for_workload_oldest_first() {
        let registry = MemoryInstanceRegistry::new();
        let mut first = instance("api");
        first.started_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let first_id = first.id;
        let second = instance("api");

        // Insertion order reversed relative to age.
        registry.register(second).await.unwrap();
        registry.register(first).await.unwrap();

        let listed = registry.list_for_workload("api").await.unwrap();
        assert_eq!(listed[0].id, first_id);
    }
}
