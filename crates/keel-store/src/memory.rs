//! In-memory resource store
//!
//! Generations are chained per name under one entry; each kind owns a change
//! feed (cursor + replay log + broadcast channel). Mutations take the entry
//! table write lock, then the feed lock, so feed order always matches
//! mutation order.

use crate::error::{StoreError, StoreResult};
use crate::traits::{PutOutcome, ResourceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_types::{
    ChangeEvent, ChangeKind, GenerationRef, Resource, ResourceKey, ResourceKind, ResourceSpec,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Broadcast capacity per kind feed. A watcher that lags past this re-syncs
/// from the replay log.
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoredGeneration {
    spec: ResourceSpec,
    applied_at: DateTime<Utc>,
    pins: u32,
}

#[derive(Debug)]
struct ResourceEntry {
    /// Current generation, `None` between delete and final collection.
    current: Option<u64>,
    /// Highest generation ever minted for this name.
    last_generation: u64,
    generations: BTreeMap<u64, StoredGeneration>,
    created_at: DateTime<Utc>,
}

struct FeedLog {
    next_cursor: u64,
    entries: VecDeque<ChangeEvent>,
}

/// Per-kind change feed. The log mutex is only ever held for the few
/// instructions around an append or a replay copy, never across an await.
struct Feed {
    log: Mutex<FeedLog>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl Feed {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            log: Mutex::new(FeedLog {
                next_cursor: 1,
                entries: VecDeque::new(),
            }),
            tx,
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, FeedLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory [`ResourceStore`] implementation.
pub struct MemoryResourceStore {
    entries: RwLock<HashMap<ResourceKey, ResourceEntry>>,
    feeds: HashMap<ResourceKind, Feed>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        let feeds = ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, Feed::new()))
            .collect();
        Self {
            entries: RwLock::new(HashMap::new()),
            feeds,
        }
    }

    fn feed(&self, kind: ResourceKind) -> &Feed {
        // All kinds are populated in `new`.
        &self.feeds[&kind]
    }

    /// Append to the feed. Called while the entry table lock is held so feed
    /// order always matches mutation order.
    fn emit(&self, key: ResourceKey, generation: u64, change: ChangeKind) {
        let feed = self.feed(key.kind);
        let mut log = feed.locked();
        let event = ChangeEvent {
            cursor: log.next_cursor,
            key,
            generation,
            change,
            at: Utc::now(),
        };
        log.next_cursor += 1;
        log.entries.push_back(event.clone());
        // Nobody listening is fine.
        let _ = feed.tx.send(event);
    }

    fn resource_from(
        key: &ResourceKey,
        entry: &ResourceEntry,
        generation: u64,
    ) -> StoreResult<Resource> {
        let stored = entry.generations.get(&generation).ok_or_else(|| {
            StoreError::Corruption(format!(
                "{key}: generation {generation} recorded but its document is missing"
            ))
        })?;
        Ok(Resource {
            key: key.clone(),
            generation,
            spec: stored.spec.clone(),
            applied_at: stored.applied_at,
            created_at: entry.created_at,
        })
    }

    async fn put_inner(
        &self,
        name: &str,
        spec: ResourceSpec,
        expected: Option<u64>,
    ) -> StoreResult<PutOutcome> {
        let key = ResourceKey::new(spec.kind(), name);
        let mut entries = self.entries.write().await;

        let entry = entries.entry(key.clone()).or_insert_with(|| ResourceEntry {
            current: None,
            last_generation: 0,
            generations: BTreeMap::new(),
            created_at: Utc::now(),
        });

        let actual = entry.current.unwrap_or(0);
        if let Some(expected) = expected {
            if actual != expected {
                return Err(StoreError::Conflict {
                    key,
                    expected,
                    actual,
                });
            }
        }

        // Idempotent re-apply: identical content keeps the current generation.
        if let Some(current) = entry.current {
            let stored = entry.generations.get(&current).ok_or_else(|| {
                StoreError::Corruption(format!(
                    "{key}: current generation {current} has no document"
                ))
            })?;
            if stored.spec == spec {
                return Ok(PutOutcome {
                    generation: current,
                    created: false,
                    changed: false,
                });
            }
        }

        let created = entry.current.is_none();
        let generation = entry.last_generation + 1;
        entry.last_generation = generation;
        entry.current = Some(generation);
        entry.generations.insert(
            generation,
            StoredGeneration {
                spec,
                applied_at: Utc::now(),
                pins: 0,
            },
        );

        let change = if created {
            ChangeKind::Created
        } else {
            ChangeKind::Updated
        };
        debug!(%key, generation, ?change, "resource applied");
        self.emit(key, generation, change);
        drop(entries);

        Ok(PutOutcome {
            generation,
            created,
            changed: true,
        })
    }
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn put(&self, name: &str, spec: ResourceSpec) -> StoreResult<PutOutcome> {
        self.put_inner(name, spec, None).await
    }

    async fn put_if_current(
        &self,
        name: &str,
        spec: ResourceSpec,
        expected_generation: u64,
    ) -> StoreResult<PutOutcome> {
        self.put_inner(name, spec, Some(expected_generation)).await
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> StoreResult<Resource> {
        let key = ResourceKey::new(kind, name);
        let entries = self.entries.read().await;
        let entry = entries
            .get(&key)
            .filter(|e| e.current.is_some())
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        let current = entry.current.unwrap_or(0);
        Self::resource_from(&key, entry, current)
    }

    async fn get_generation(
        &self,
        kind: ResourceKind,
        name: &str,
        generation: u64,
    ) -> StoreResult<Resource> {
        let key = ResourceKey::new(kind, name);
        let entries = self.entries.read().await;
        let entry = entries
            .get(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;

        if entry.generations.contains_key(&generation) {
            return Self::resource_from(&key, entry, generation);
        }
        if generation <= entry.last_generation {
            Err(StoreError::GenerationCollected { key, generation })
        } else {
            Err(StoreError::NotFound { key })
        }
    }

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<Resource>> {
        let entries = self.entries.read().await;
        let mut resources = Vec::new();
        for (key, entry) in entries.iter() {
            if key.kind != kind {
                continue;
            }
            if let Some(current) = entry.current {
                resources.push(Self::resource_from(key, entry, current)?);
            }
        }
        // Declaration order: first applied first, name as tie-break.
        resources.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key.name.cmp(&b.key.name))
        });
        Ok(resources)
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> StoreResult<()> {
        let key = ResourceKey::new(kind, name);
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&key)
            .filter(|e| e.current.is_some())
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;

        let last_current = entry.current.take().unwrap_or(0);
        entry.generations.retain(|_, stored| stored.pins > 0);
        if entry.generations.is_empty() {
            entries.remove(&key);
        }

        debug!(%key, generation = last_current, "resource deleted");
        self.emit(key, last_current, ChangeKind::Deleted);
        drop(entries);
        Ok(())
    }

    async fn pin(&self, gen_ref: &GenerationRef) -> StoreResult<()> {
        let key = ResourceKey::new(gen_ref.kind, gen_ref.name.clone());
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        match entry.generations.get_mut(&gen_ref.generation) {
            Some(stored) => {
                stored.pins += 1;
                Ok(())
            }
            None if gen_ref.generation <= entry.last_generation => {
                Err(StoreError::GenerationCollected {
                    key,
                    generation: gen_ref.generation,
                })
            }
            None => Err(StoreError::NotFound { key }),
        }
    }

    async fn unpin(&self, gen_ref: &GenerationRef) -> StoreResult<()> {
        let key = ResourceKey::new(gen_ref.kind, gen_ref.name.clone());
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&key) {
            if let Some(stored) = entry.generations.get_mut(&gen_ref.generation) {
                if stored.pins == 0 {
                    warn!(%key, generation = gen_ref.generation, "unpin without matching pin");
                }
                stored.pins = stored.pins.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn collect_garbage(&self) -> StoreResult<u64> {
        let mut entries = self.entries.write().await;
        let mut collected = 0u64;
        entries.retain(|_, entry| {
            let current = entry.current;
            let before = entry.generations.len();
            entry
                .generations
                .retain(|gen, stored| Some(*gen) == current || stored.pins > 0);
            collected += (before - entry.generations.len()) as u64;
            // Deleted names vanish entirely once nothing is pinned.
            current.is_some() || !entry.generations.is_empty()
        });
        if collected > 0 {
            debug!(collected, "collected unpinned generations");
        }
        Ok(collected)
    }

    fn subscribe(&self, kind: ResourceKind) -> broadcast::Receiver<ChangeEvent> {
        self.feed(kind).tx.subscribe()
    }

    async fn changes_since(
        &self,
        kind: ResourceKind,
        cursor: u64,
    ) -> StoreResult<Vec<ChangeEvent>> {
        let log = self.feed(kind).locked();
        Ok(log
            .entries
            .iter()
            .filter(|event| event.cursor >= cursor)
            .cloned()
            .collect())
    }

    async fn next_cursor(&self, kind: ResourceKind) -> StoreResult<u64> {
        Ok(self.feed(kind).locked().next_cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{ConfigMapSpec, SecretSpec};
    use std::collections::BTreeMap as Map;

    fn secret(value: &str) -> ResourceSpec {
        ResourceSpec::Secret(SecretSpec {
            data: Map::from([("uri".to_string(), value.to_string())]),
        })
    }

    #[tokio::test]
    async fn test_put_creates_generation_one() {
        let store = MemoryResourceStore::new();
        let outcome = store.put("db-credentials", secret("a")).await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert!(outcome.created);
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_update_bumps_generation() {
        let store = MemoryResourceStore::new();
        store.put("db-credentials", secret("a")).await.unwrap();
        let outcome = store.put("db-credentials", secret("b")).await.unwrap();
        assert_eq!(outcome.generation, 2);
        assert!(!outcome.created);

        let current = store
            .get(ResourceKind::Secret, "db-credentials")
            .await
            .unwrap();
        assert_eq!(current.generation, 2);
    }

    #[tokio::test]
    async fn test_identical_reapply_is_idempotent() {
        let store = MemoryResourceStore::new();
        store.put("db-credentials", secret("a")).await.unwrap();
        let outcome = store.put("db-credentials", secret("a")).await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert!(!outcome.changed);

        // No second change event either.
        let changes = store
            .changes_since(ResourceKind::Secret, 1)
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test]
    async fn test_pinned_generation_survives_update_and_delete() {
        let store = MemoryResourceStore::new();
        store.put("db-credentials", secret("a")).await.unwrap();
        let pin = GenerationRef {
            kind: ResourceKind::Secret,
            name: "db-credentials".to_string(),
            generation: 1,
        };
        store.pin(&pin).await.unwrap();

        store.put("db-credentials", secret("b")).await.unwrap();
        store
            .delete(ResourceKind::Secret, "db-credentials")
            .await
            .unwrap();

        // Name is gone but the pinned generation still reads.
        assert!(matches!(
            store.get(ResourceKind::Secret, "db-credentials").await,
            Err(StoreError::NotFound { .. })
        ));
        let pinned = store
            .get_generation(ResourceKind::Secret, "db-credentials", 1)
            .await
            .unwrap();
        assert_eq!(pinned.generation, 1);

        // Unpin, collect, and it is gone for good.
        store.unpin(&pin).await.unwrap();
        store.collect_garbage().await.unwrap();
        assert!(matches!(
            store
                .get_generation(ResourceKind::Secret, "db-credentials", 1)
                .await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_collected_generation_reported_as_stale() {
        let store = MemoryResourceStore::new();
        store.put("settings", config("a")).await.unwrap();
        store.put("settings", config("b")).await.unwrap();
        store.collect_garbage().await.unwrap();

        assert!(matches!(
            store
                .get_generation(ResourceKind::ConfigMap, "settings", 1)
                .await,
            Err(StoreError::GenerationCollected { generation: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_put_if_current_conflicts() {
        let store = MemoryResourceStore::new();
        store.put("db-credentials", secret("a")).await.unwrap();
        store.put("db-credentials", secret("b")).await.unwrap();

        let err = store
            .put_if_current("db-credentials", secret("c"), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        store
            .put_if_current("db-credentials", secret("c"), 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_in_declaration_order() {
        let store = MemoryResourceStore::new();
        store.put("zeta", config("1")).await.unwrap();
        store.put("alpha", config("1")).await.unwrap();
        // Updating the first does not reorder it.
        store.put("zeta", config("2")).await.unwrap();

        let listed = store.list(ResourceKind::ConfigMap).await.unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.key.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_subscribe_receives_changes() {
        let store = MemoryResourceStore::new();
        let mut rx = store.subscribe(ResourceKind::Secret);

        store.put("db-credentials", secret("a")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.change, ChangeKind::Created);
        assert_eq!(event.cursor, 1);

        store
            .delete(ResourceKind::Secret, "db-credentials")
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.change, ChangeKind::Deleted);
        assert_eq!(event.cursor, 2);
    }

    #[tokio::test]
    async fn test_changes_since_filters_by_cursor() {
        let store = MemoryResourceStore::new();
        store.put("a", config("1")).await.unwrap();
        store.put("b", config("1")).await.unwrap();
        store.put("c", config("1")).await.unwrap();

        let changes = store
            .changes_since(ResourceKind::ConfigMap, 2)
            .await
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key.name, "b");
    }

    fn config(value: &str) -> ResourceSpec {
        ResourceSpec::ConfigMap(ConfigMapSpec {
            data: Map::from([("key".to_string(), value.to_string())]),
        })
    }
}
