//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use keel_ingress::IngressRouter;
use keel_reconciler::{ReconcilerSupervisor, SimulatedRuntime};
use keel_registry::{MemoryInstanceRegistry, ServiceRegistry};
use keel_store::{MemoryResourceStore, ResourceStore};
use keel_types::{EventSource, KeelEvent, KeelEventEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Keel daemon server
pub struct Server {
    config: DaemonConfig,
    store: Arc<dyn ResourceStore>,
    registry: Arc<ServiceRegistry>,
    supervisor: Arc<ReconcilerSupervisor>,
    ingress: Arc<IngressRouter>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
}

impl Server {
    /// Wire up the control plane with the given configuration.
    pub fn new(config: DaemonConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1000);

        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        let registry = Arc::new(
            ServiceRegistry::new(Arc::new(MemoryInstanceRegistry::new()))
                .with_events(event_tx.clone()),
        );
        let runtime = Arc::new(SimulatedRuntime::new(config.runtime.startup_delay()));

        let supervisor = ReconcilerSupervisor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            runtime,
            config.reconciler.to_supervisor_config(),
            event_tx.clone(),
        );
        let ingress = Arc::new(
            IngressRouter::new(Arc::clone(&store), Arc::clone(&registry))
                .with_events(event_tx.clone()),
        );

        Self {
            config,
            store,
            registry,
            supervisor,
            ingress,
            event_tx,
        }
    }

    /// Run the server until ctrl-c or SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.supervisor),
            Arc::clone(&self.ingress),
            self.event_tx.clone(),
        );
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("keel daemon listening on {}", addr);

        // Control loops run for the life of the process; the supervisor is
        // stopped explicitly after the server drains.
        tokio::spawn(Arc::clone(&self.supervisor).start());
        tokio::spawn(Arc::clone(&self.ingress).start());
        tokio::spawn(gc_loop(
            Arc::clone(&self.store),
            self.event_tx.clone(),
            Duration::from_secs(self.config.store.gc_interval_secs.max(1)),
        ));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("keel daemon shutting down");

        self.supervisor.stop().await;

        Ok(())
    }
}

/// Collect unpinned generations on a fixed cadence.
async fn gc_loop(
    store: Arc<dyn ResourceStore>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.collect_garbage().await {
            Ok(0) => {}
            Ok(collected) => {
                tracing::debug!(collected, "collected unpinned generations");
                let _ = event_tx.send(KeelEventEnvelope::new(
                    KeelEvent::GenerationsCollected { collected },
                    EventSource::Store,
                ));
            }
            Err(e) => tracing::warn!(error = %e, "garbage collection failed"),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
