//! Container runtime boundary
//!
//! The reconciler drives processes through [`ContainerRuntime`] and never
//! assumes anything about what runs behind it. [`SimulatedRuntime`] is the
//! in-process implementation used by the daemon and the tests: each start
//! gets its own loopback address, health moves Pending to Ready after a
//! configurable delay, and faults can be injected to exercise the backoff
//! and Degraded paths.

use crate::error::RuntimeError;
use async_trait::async_trait;
use dashmap::DashMap;
use keel_types::InstanceHealth;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Identity of one started process as the runtime knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    pub id: String,
    pub address: String,
    pub port: u16,
}

/// Starts, stops, and reports health of workload processes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start one process from an image with a frozen env. The returned
    /// handle carries where the process is reachable.
    async fn start(
        &self,
        image: &str,
        env: &BTreeMap<String, String>,
        port: u16,
    ) -> Result<RuntimeHandle, RuntimeError>;

    /// Stop a process gracefully. Stopping an already-gone handle is not an
    /// error.
    async fn stop(&self, handle: &RuntimeHandle) -> Result<(), RuntimeError>;

    /// Terminate a process immediately. Used when a graceful stop exceeds
    /// its grace period. Idempotent.
    async fn kill(&self, handle: &RuntimeHandle);

    /// Current health as the runtime sees it. An unknown handle is Failed.
    async fn health_of(&self, handle: &RuntimeHandle) -> InstanceHealth;
}

struct SimulatedProcess {
    image: String,
    started_at: Instant,
    failed: bool,
}

/// In-process runtime: no containers, just bookkeeping with realistic
/// timing. Fault injection drives the failure paths deterministically.
pub struct SimulatedRuntime {
    startup_delay: Duration,
    stop_delay_ms: AtomicU64,
    fail_next_starts: AtomicU32,
    next_address: AtomicU32,
    processes: DashMap<String, SimulatedProcess>,
}

impl SimulatedRuntime {
    pub fn new(startup_delay: Duration) -> Self {
        Self {
            startup_delay,
            stop_delay_ms: AtomicU64::new(0),
            fail_next_starts: AtomicU32::new(0),
            // 127.0.0.1 is left to the daemon itself.
            next_address: AtomicU32::new(2),
            processes: DashMap::new(),
        }
    }

    /// Fail the next `n` start calls with `StartFailed`.
    pub fn fail_next_starts(&self, n: u32) {
        self.fail_next_starts.store(n, Ordering::SeqCst);
    }

    /// Mark a running process as failed; `health_of` reports Failed from
    /// now on.
    pub fn fail_instance(&self, handle_id: &str) {
        if let Some(mut process) = self.processes.get_mut(handle_id) {
            process.failed = true;
        }
    }

    /// Make every `stop` take this long before completing, to exercise the
    /// grace-period timeout.
    pub fn set_stop_delay(&self, delay: Duration) {
        self.stop_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of processes currently running.
    pub fn running_count(&self) -> usize {
        self.processes.len()
    }

    /// Ids of every running process, in no particular order.
    pub fn handle_ids(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.key().clone()).collect()
    }

    fn allocate_address(&self) -> String {
        let n = self.next_address.fetch_add(1, Ordering::SeqCst);
        format!("127.0.{}.{}", (n >> 8) & 0xff, n & 0xff)
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn start(
        &self,
        image: &str,
        _env: &BTreeMap<String, String>,
        port: u16,
    ) -> Result<RuntimeHandle, RuntimeError> {
        let inject = self
            .fail_next_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(RuntimeError::StartFailed(format!(
                "injected start failure for {image}"
            )));
        }

        let handle = RuntimeHandle {
            id: format!("sim-{}", uuid::Uuid::new_v4()),
            address: self.allocate_address(),
            port,
        };
        self.processes.insert(
            handle.id.clone(),
            SimulatedProcess {
                image: image.to_string(),
                started_at: Instant::now(),
                failed: false,
            },
        );
        debug!(id = %handle.id, image, address = %handle.address, "simulated process started");
        Ok(handle)
    }

    async fn stop(&self, handle: &RuntimeHandle) -> Result<(), RuntimeError> {
        let delay = self.stop_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some((_, process)) = self.processes.remove(&handle.id) {
            debug!(id = %handle.id, image = %process.image, "simulated process stopped");
        }
        Ok(())
    }

    async fn kill(&self, handle: &RuntimeHandle) {
        if self.processes.remove(&handle.id).is_some() {
            debug!(id = %handle.id, "simulated process killed");
        }
    }

    async fn health_of(&self, handle: &RuntimeHandle) -> InstanceHealth {
        match self.processes.get(&handle.id) {
            None => InstanceHealth::Failed,
            Some(process) if process.failed => InstanceHealth::Failed,
            Some(process) if process.started_at.elapsed() < self.startup_delay => {
                InstanceHealth::Pending
            }
            Some(_) => InstanceHealth::Ready,
        }
    }
}
