//! Per-workload reconcile worker
//!
//! One worker task per workload name: an mpsc trigger plus a periodic
//! resync tick drive `reconcile_pass`, so concurrent desired-state changes
//! to one workload never race on instance creation, while distinct
//! workloads reconcile in parallel.
//!
//! A pass is a full diff of desired against observed: poll health, reap
//! failed instances, create missing ones up to the parallel-start limit,
//! retire excess oldest-first, then recompute the phase. Instances are
//! matched against the current spec by template hash (image, port, env),
//! not by generation, so a pure replica-count change keeps the instances
//! it already has.

use crate::error::{MaterializeError, ReconcileError};
use crate::materializer::{MaterializedEnv, Materializer};
use crate::runtime::{ContainerRuntime, RuntimeHandle};
use crate::supervisor::ReconcilerConfig;
use dashmap::DashMap;
use keel_registry::ServiceRegistry;
use keel_store::{ResourceStore, StoreError};
use keel_types::{
    EventSource, Instance, InstanceHealth, InstanceId, KeelEvent, KeelEventEnvelope, ResourceKind,
    WorkloadPhase, WorkloadSpec, WorkloadState, LABEL_TEMPLATE_HASH, LABEL_WORKLOAD,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// What a pass concluded about the worker's future.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReconcileOutcome {
    /// Keep the loop running.
    Continue,
    /// The workload resource is gone and all instances are destroyed.
    Gone,
}

pub(crate) struct WorkloadWorker {
    name: String,
    store: Arc<dyn ResourceStore>,
    registry: Arc<ServiceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    materializer: Materializer,
    config: ReconcilerConfig,
    states: Arc<DashMap<String, WorkloadState>>,
    paused: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
    trigger_tx: mpsc::Sender<()>,

    /// Worker-local authoritative copy, mirrored into `states` after every
    /// mutation. The worker is the only writer for its name.
    state: WorkloadState,
    handles: HashMap<InstanceId, RuntimeHandle>,
    next_retry_at: Option<Instant>,
}

impl WorkloadWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        store: Arc<dyn ResourceStore>,
        registry: Arc<ServiceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        config: ReconcilerConfig,
        states: Arc<DashMap<String, WorkloadState>>,
        paused: Arc<AtomicBool>,
        halted: Arc<AtomicBool>,
        event_tx: broadcast::Sender<KeelEventEnvelope>,
        trigger_tx: mpsc::Sender<()>,
    ) -> Self {
        let state = states
            .get(&name)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| WorkloadState::new(&name));
        let materializer = Materializer::new(Arc::clone(&store));
        Self {
            name,
            store,
            registry,
            runtime,
            materializer,
            config,
            states,
            paused,
            halted,
            event_tx,
            trigger_tx,
            state,
            handles: HashMap::new(),
            next_retry_at: None,
        }
    }

    /// Drive passes until the workload is gone or the supervisor drops the
    /// trigger sender.
    pub(crate) async fn run(mut self, mut trigger_rx: mpsc::Receiver<()>) {
        let mut resync = interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = resync.tick() => {}
                message = trigger_rx.recv() => {
                    if message.is_none() {
                        break;
                    }
                }
            }

            if self.halted.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst) {
                continue;
            }

            match self.reconcile_pass().await {
                Ok(ReconcileOutcome::Continue) => {}
                Ok(ReconcileOutcome::Gone) => break,
                Err(e) if e.is_fatal() => {
                    error!(workload = %self.name, error = %e, "store corruption, halting reconciliation");
                    self.halted.store(true, Ordering::SeqCst);
                    self.emit(KeelEvent::ReconcilerHalted {
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => {
                    warn!(workload = %self.name, error = %e, "reconcile pass failed");
                    self.emit(KeelEvent::ReconcilePassFailed {
                        workload: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(workload = %self.name, "worker stopped");
    }

    #[instrument(skip(self), fields(workload = %self.name))]
    pub(crate) async fn reconcile_pass(&mut self) -> Result<ReconcileOutcome, ReconcileError> {
        let resource = match self.store.get(ResourceKind::Workload, &self.name).await {
            Ok(resource) => resource,
            Err(StoreError::NotFound { .. }) => {
                self.terminate().await?;
                return Ok(ReconcileOutcome::Gone);
            }
            Err(e) => return Err(e.into()),
        };
        let spec = match resource.spec.as_workload() {
            Some(spec) => spec.clone(),
            None => {
                return Err(StoreError::Corruption(format!(
                    "workload/{} holds a non-workload document",
                    self.name
                ))
                .into());
            }
        };

        // The start-attempt budget belongs to one generation; a re-apply
        // with changed content resets it.
        if resource.generation != self.state.observed_generation {
            debug!(
                workload = %self.name,
                from = self.state.observed_generation,
                to = resource.generation,
                "observed new generation"
            );
            self.state.observed_generation = resource.generation;
            self.state.start_attempts = 0;
            self.next_retry_at = None;
        }
        self.state.desired_replicas = spec.replicas;

        self.poll_health().await?;
        self.reap_failed().await?;

        let template = spec.template_hash();
        let live = self.live_instances().await?;
        let current = live
            .iter()
            .filter(|i| matches_template(i, &template))
            .count() as u32;

        // Pending/Degraded override computed at the end of the pass.
        let mut block: Option<(WorkloadPhase, String)> = None;

        if current < spec.replicas {
            if self.in_backoff() {
                debug!(workload = %self.name, "creation deferred, waiting out backoff");
            } else if self.state.start_attempts < self.config.max_start_attempts {
                match self.materializer.resolve(&spec).await {
                    Ok(env) => {
                        if matches!(
                            self.state.phase,
                            WorkloadPhase::Pending | WorkloadPhase::Degraded
                        ) {
                            self.transition(WorkloadPhase::Materializing, None);
                        }
                        let batch =
                            (spec.replicas - current).min(self.config.parallel_start_limit as u32);
                        for _ in 0..batch {
                            let started = self
                                .start_instance(resource.generation, &spec, &env, &template)
                                .await?;
                            if !started {
                                break;
                            }
                        }
                    }
                    Err(MaterializeError::UnresolvedReference { references }) => {
                        block = Some((
                            WorkloadPhase::Pending,
                            format!("unresolved references: {}", references.join(", ")),
                        ));
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if self.state.start_attempts >= self.config.max_start_attempts && block.is_none() {
                block = Some((
                    WorkloadPhase::Degraded,
                    format!(
                        "start attempt budget exhausted after {} attempts",
                        self.state.start_attempts
                    ),
                ));
            }
        }

        // Retirement half of the diff: excess live instances go oldest
        // first, which also replaces stale-template instances as new
        // capacity arrives.
        let live = self.live_instances().await?;
        let excess = live.len().saturating_sub(spec.replicas as usize);
        for instance in live.iter().take(excess) {
            self.retire_instance(instance).await?;
        }
        let remaining = &live[excess..];

        self.state.live_replicas = remaining.len() as u32;
        self.state.ready_replicas = remaining
            .iter()
            .filter(|i| i.health == InstanceHealth::Ready)
            .count() as u32;

        match block {
            Some((phase, message)) => self.transition(phase, Some(message)),
            None => {
                let all_current = remaining.iter().all(|i| matches_template(i, &template));
                if self.state.live_replicas == spec.replicas && all_current {
                    self.transition(WorkloadPhase::Steady, None);
                } else {
                    self.transition(WorkloadPhase::Scaling, None);
                }
            }
        }

        Ok(ReconcileOutcome::Continue)
    }

    /// Compare runtime-reported health with registry state and publish
    /// transitions. An instance whose handle is unknown is failed.
    async fn poll_health(&mut self) -> Result<(), ReconcileError> {
        let instances = self
            .registry
            .instances()
            .list_for_workload(&self.name)
            .await?;
        for instance in instances {
            if instance.health == InstanceHealth::Terminating {
                continue;
            }
            let handle = match self.handles.get(&instance.id) {
                Some(handle) => handle.clone(),
                None => {
                    if instance.health != InstanceHealth::Failed {
                        self.registry
                            .publish(&instance.id, InstanceHealth::Failed)
                            .await?;
                    }
                    continue;
                }
            };

            let health = self.runtime.health_of(&handle).await;
            if health == instance.health {
                continue;
            }
            match health {
                InstanceHealth::Ready => {
                    info!(workload = %self.name, instance = %instance.id, "instance ready");
                    self.emit(KeelEvent::InstanceReady {
                        instance_id: instance.id,
                    });
                }
                InstanceHealth::Failed => {
                    warn!(workload = %self.name, instance = %instance.id, "instance failed");
                    self.emit(KeelEvent::InstanceFailed {
                        instance_id: instance.id,
                        workload: self.name.clone(),
                    });
                }
                _ => {}
            }
            self.registry.publish(&instance.id, health).await?;
        }
        Ok(())
    }

    /// Remove failed instances. Each one consumes a start attempt and arms
    /// the backoff window for its replacement.
    async fn reap_failed(&mut self) -> Result<(), ReconcileError> {
        let failed: Vec<Instance> = self
            .registry
            .instances()
            .list_for_workload(&self.name)
            .await?
            .into_iter()
            .filter(|i| i.health == InstanceHealth::Failed)
            .collect();

        for instance in failed {
            debug!(workload = %self.name, instance = %instance.id, "reaping failed instance");
            if let Some(handle) = self.handles.remove(&instance.id) {
                self.runtime.kill(&handle).await;
            }
            self.registry.retire_instance(&instance.id).await?;
            self.materializer.unpin_all(&instance.pins).await;
            self.note_failure();
        }
        Ok(())
    }

    /// Start one instance of the current template. Returns false when the
    /// start failed and the batch should stop.
    async fn start_instance(
        &mut self,
        generation: u64,
        spec: &WorkloadSpec,
        env: &MaterializedEnv,
        template: &str,
    ) -> Result<bool, ReconcileError> {
        self.materializer.pin_all(&env.pins).await?;

        match self.runtime.start(&spec.image, &env.vars, spec.port).await {
            Ok(handle) => {
                let instance = self.build_instance(generation, template, env, &handle);
                let id = instance.id;
                self.registry.register_instance(instance).await?;
                self.handles.insert(id, handle);
                self.next_retry_at = None;
                info!(workload = %self.name, instance = %id, generation, "instance created");
                self.emit(KeelEvent::InstanceCreated {
                    instance_id: id,
                    workload: self.name.clone(),
                    generation,
                });
                Ok(true)
            }
            Err(e) => {
                self.materializer.unpin_all(&env.pins).await;
                self.note_failure();
                warn!(
                    workload = %self.name,
                    attempt = self.state.start_attempts,
                    error = %e,
                    "instance start failed"
                );
                self.emit(KeelEvent::InstanceStartFailed {
                    workload: self.name.clone(),
                    attempt: self.state.start_attempts,
                    reason: e.to_string(),
                });
                Ok(false)
            }
        }
    }

    fn build_instance(
        &self,
        generation: u64,
        template: &str,
        env: &MaterializedEnv,
        handle: &RuntimeHandle,
    ) -> Instance {
        let labels = BTreeMap::from([
            (LABEL_WORKLOAD.to_string(), self.name.clone()),
            (LABEL_TEMPLATE_HASH.to_string(), template.to_string()),
        ]);
        Instance {
            id: InstanceId::generate(),
            workload: self.name.clone(),
            workload_generation: generation,
            labels,
            address: handle.address.clone(),
            port: handle.port,
            health: InstanceHealth::Pending,
            pins: env.pins.clone(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Retire one live instance: out of the endpoint snapshots first, then
    /// a graceful stop bounded by the grace period.
    async fn retire_instance(&mut self, instance: &Instance) -> Result<(), ReconcileError> {
        info!(workload = %self.name, instance = %instance.id, "retiring instance");
        self.registry
            .publish(&instance.id, InstanceHealth::Terminating)
            .await?;
        self.stop_with_grace(instance).await;
        self.registry.retire_instance(&instance.id).await?;
        self.materializer.unpin_all(&instance.pins).await;
        self.handles.remove(&instance.id);
        self.emit(KeelEvent::InstanceRetired {
            instance_id: instance.id,
            workload: self.name.clone(),
        });
        Ok(())
    }

    async fn stop_with_grace(&mut self, instance: &Instance) {
        let handle = match self.handles.get(&instance.id) {
            Some(handle) => handle.clone(),
            None => return,
        };
        match tokio::time::timeout(self.config.stop_grace, self.runtime.stop(&handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(instance = %instance.id, error = %e, "stop failed, killing");
                self.runtime.kill(&handle).await;
            }
            Err(_) => {
                warn!(
                    instance = %instance.id,
                    grace_ms = self.config.stop_grace.as_millis() as u64,
                    "stop exceeded grace period, force-terminating"
                );
                self.runtime.kill(&handle).await;
                self.emit(KeelEvent::InstanceForceTerminated {
                    instance_id: instance.id,
                    workload: self.name.clone(),
                });
            }
        }
    }

    /// The workload resource was deleted: stop everything, then report Gone
    /// and drop the state entry.
    async fn terminate(&mut self) -> Result<(), ReconcileError> {
        info!(workload = %self.name, "workload deleted, terminating");
        self.transition(WorkloadPhase::Terminating, None);

        let instances = self
            .registry
            .instances()
            .list_for_workload(&self.name)
            .await?;
        for instance in instances {
            if instance.health != InstanceHealth::Terminating {
                self.registry
                    .publish(&instance.id, InstanceHealth::Terminating)
                    .await?;
            }
            self.stop_with_grace(&instance).await;
            self.registry.retire_instance(&instance.id).await?;
            self.materializer.unpin_all(&instance.pins).await;
            self.handles.remove(&instance.id);
            self.emit(KeelEvent::InstanceRetired {
                instance_id: instance.id,
                workload: self.name.clone(),
            });
        }

        self.transition(WorkloadPhase::Gone, None);
        self.states.remove(&self.name);
        Ok(())
    }

    async fn live_instances(&self) -> Result<Vec<Instance>, ReconcileError> {
        let instances = self
            .registry
            .instances()
            .list_for_workload(&self.name)
            .await?;
        Ok(instances.into_iter().filter(|i| i.health.is_live()).collect())
    }

    fn in_backoff(&self) -> bool {
        self.next_retry_at
            .map(|at| Instant::now() < at)
            .unwrap_or(false)
    }

    /// Record one failure against the generation's budget and schedule the
    /// retry trigger, unless the budget is already spent.
    fn note_failure(&mut self) {
        self.state.start_attempts += 1;
        if self.state.start_attempts >= self.config.max_start_attempts {
            return;
        }
        let delay = self.config.backoff.delay_for(self.state.start_attempts);
        let at = Instant::now() + delay;
        self.next_retry_at = Some(at);
        debug!(
            workload = %self.name,
            attempt = self.state.start_attempts,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        let trigger = self.trigger_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
            let _ = trigger.send(()).await;
        });
    }

    fn transition(&mut self, phase: WorkloadPhase, message: Option<String>) {
        if self.state.phase != phase {
            info!(workload = %self.name, from = %self.state.phase, to = %phase, "phase changed");
            self.emit(KeelEvent::WorkloadPhaseChanged {
                workload: self.name.clone(),
                from: self.state.phase,
                to: phase,
                message: message.clone(),
            });
        }
        self.state.phase = phase;
        self.state.message = message;
        self.state.updated_at = chrono::Utc::now();
        self.publish_state();
    }

    fn publish_state(&self) {
        self.states.insert(self.name.clone(), self.state.clone());
    }

    fn emit(&self, event: KeelEvent) {
        let _ = self
            .event_tx
            .send(KeelEventEnvelope::new(event, EventSource::Reconciler));
    }
}

fn matches_template(instance: &Instance, template: &str) -> bool {
    instance.labels.get(LABEL_TEMPLATE_HASH).map(String::as_str) == Some(template)
}
