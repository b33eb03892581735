//! Reconciler supervisor
//!
//! Owns the per-workload workers and drives them from the store's change
//! feeds: workload changes spawn or trigger the matching worker,
//! secret/config changes trigger every worker (resolution inputs moved),
//! service changes flow into the service registry. The supervisor itself
//! never reconciles; all instance decisions stay inside the workers.

use crate::backoff::BackoffConfig;
use crate::runtime::ContainerRuntime;
use crate::worker::WorkloadWorker;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keel_registry::ServiceRegistry;
use keel_store::{watch, ResourceStore};
use keel_types::{
    ChangeEvent, ChangeKind, EventSource, KeelEvent, KeelEventEnvelope, ResourceKind,
    WorkloadState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// Tuning knobs for the reconcile loops.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between full passes when no change arrives.
    pub resync_interval: Duration,

    /// Instances created per workload per pass, bounding how much one
    /// rollout can starve others.
    pub parallel_start_limit: usize,

    /// Start failures tolerated per workload generation before Degraded.
    pub max_start_attempts: u32,

    /// Retry delay policy for failed starts.
    pub backoff: BackoffConfig,

    /// How long a graceful stop may take before force-termination.
    pub stop_grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(30),
            parallel_start_limit: 2,
            max_start_attempts: 5,
            backoff: BackoffConfig::default(),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// Spawns and feeds the per-workload workers.
pub struct ReconcilerSupervisor {
    store: Arc<dyn ResourceStore>,
    registry: Arc<ServiceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    config: ReconcilerConfig,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
    states: Arc<DashMap<String, WorkloadState>>,
    workers: DashMap<String, mpsc::Sender<()>>,
    paused: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    running: Arc<RwLock<bool>>,
}

impl ReconcilerSupervisor {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: Arc<ServiceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        config: ReconcilerConfig,
        event_tx: broadcast::Sender<KeelEventEnvelope>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            runtime,
            config,
            event_tx,
            states: Arc::new(DashMap::new()),
            workers: DashMap::new(),
            paused: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(AtomicBool::new(false)),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Seed workers for existing resources, then follow the change feeds
    /// until stopped. Cursors are taken before seeding so a resource
    /// applied in between is seen by both paths rather than neither.
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!("reconciler supervisor started");

        let workload_cursor = self.cursor_for(ResourceKind::Workload).await;
        let secret_cursor = self.cursor_for(ResourceKind::Secret).await;
        let config_cursor = self.cursor_for(ResourceKind::ConfigMap).await;
        let service_cursor = self.cursor_for(ResourceKind::Service).await;

        self.seed().await;

        let workloads = tokio::spawn(
            Arc::clone(&self).watch_kind(ResourceKind::Workload, workload_cursor),
        );
        let secrets =
            tokio::spawn(Arc::clone(&self).watch_kind(ResourceKind::Secret, secret_cursor));
        let configs =
            tokio::spawn(Arc::clone(&self).watch_kind(ResourceKind::ConfigMap, config_cursor));
        let services =
            tokio::spawn(Arc::clone(&self).watch_kind(ResourceKind::Service, service_cursor));

        tokio::select! {
            _ = workloads => {}
            _ = secrets => {}
            _ = configs => {}
            _ = services => {}
        }

        info!("reconciler supervisor stopped");
    }

    /// Stop following changes and shut the workers down.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        // Dropping the senders ends each worker's recv loop.
        self.workers.clear();
    }

    /// Suspend reconcile passes globally. Watch triggers keep queueing.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("reconciliation paused");
        self.emit(KeelEvent::ReconcilerPaused);
    }

    /// Resume passes and nudge every worker to catch up.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("reconciliation resumed");
        self.emit(KeelEvent::ReconcilerResumed);
        self.trigger_all();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// True once a fatal store error stopped all reconciliation.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn workload_state(&self, name: &str) -> Option<WorkloadState> {
        self.states.get(name).map(|entry| entry.clone())
    }

    pub fn workload_states(&self) -> Vec<WorkloadState> {
        let mut states: Vec<WorkloadState> =
            self.states.iter().map(|entry| entry.clone()).collect();
        states.sort_by(|a, b| a.workload.cmp(&b.workload));
        states
    }

    /// Queue a pass for one workload. A full queue is fine: a pass is
    /// already pending.
    pub fn trigger(&self, name: &str) {
        let sender = self.workers.get(name).map(|entry| entry.clone());
        if let Some(sender) = sender {
            match sender.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                Err(mpsc::error::TrySendError::Closed(())) => {
                    self.workers.remove(name);
                }
            }
        }
    }

    pub fn trigger_all(&self) {
        let names: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            self.trigger(&name);
        }
    }

    async fn cursor_for(&self, kind: ResourceKind) -> Option<u64> {
        match self.store.next_cursor(kind).await {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                warn!(%kind, error = %e, "cursor unavailable, subscribing from head");
                None
            }
        }
    }

    async fn seed(self: &Arc<Self>) {
        match self.store.list(ResourceKind::Workload).await {
            Ok(resources) => {
                for resource in resources {
                    self.ensure_worker(&resource.key.name);
                    self.trigger(&resource.key.name);
                }
            }
            Err(e) => warn!(error = %e, "failed to list workloads at startup"),
        }

        match self.store.list(ResourceKind::Service).await {
            Ok(resources) => {
                for resource in resources {
                    self.apply_service(&resource.key.name).await;
                }
            }
            Err(e) => warn!(error = %e, "failed to list services at startup"),
        }
    }

    async fn watch_kind(self: Arc<Self>, kind: ResourceKind, from_cursor: Option<u64>) {
        let mut subscription = match watch(Arc::clone(&self.store), kind, from_cursor).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(%kind, error = %e, "failed to open watch");
                return;
            }
        };

        while let Some(event) = subscription.next().await {
            if !*self.running.read().await {
                break;
            }
            self.handle_change(kind, event).await;
        }
    }

    async fn handle_change(self: &Arc<Self>, kind: ResourceKind, event: ChangeEvent) {
        debug!(%kind, name = %event.key.name, change = ?event.change, "resource changed");
        match kind {
            ResourceKind::Workload => {
                if event.change != ChangeKind::Deleted {
                    self.ensure_worker(&event.key.name);
                }
                self.trigger(&event.key.name);
            }
            // Resolution inputs changed; any blocked workload may now
            // materialize.
            ResourceKind::Secret | ResourceKind::ConfigMap => {
                self.trigger_all();
            }
            ResourceKind::Service => match event.change {
                ChangeKind::Deleted => self.registry.remove_service(&event.key.name),
                _ => self.apply_service(&event.key.name).await,
            },
            ResourceKind::IngressRule => {}
        }
    }

    async fn apply_service(&self, name: &str) {
        match self.store.get(ResourceKind::Service, name).await {
            Ok(resource) => {
                if let Some(spec) = resource.spec.as_service() {
                    if let Err(e) = self.registry.upsert_service(name, spec.clone()).await {
                        warn!(service = %name, error = %e, "failed to apply service");
                    }
                }
            }
            // Deleted between the event and the read; the Deleted event
            // will clean up.
            Err(_) => {}
        }
    }

    fn ensure_worker(self: &Arc<Self>, name: &str) {
        match self.workers.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    let sender = self.spawn_worker(name);
                    occupied.insert(sender);
                }
            }
            Entry::Vacant(vacant) => {
                let sender = self.spawn_worker(name);
                vacant.insert(sender);
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, name: &str) -> mpsc::Sender<()> {
        debug!(workload = %name, "spawning worker");
        let (trigger_tx, trigger_rx) = mpsc::channel(10);
        self.states
            .entry(name.to_string())
            .or_insert_with(|| WorkloadState::new(name));

        let worker = WorkloadWorker::new(
            name.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.runtime),
            self.config.clone(),
            Arc::clone(&self.states),
            Arc::clone(&self.paused),
            Arc::clone(&self.halted),
            self.event_tx.clone(),
            trigger_tx.clone(),
        );
        tokio::spawn(worker.run(trigger_rx));
        trigger_tx
    }

    fn emit(&self, event: KeelEvent) {
        let _ = self
            .event_tx
            .send(KeelEventEnvelope::new(event, EventSource::Reconciler));
    }
}
