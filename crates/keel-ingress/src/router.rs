//! Host/path rule matching
//!
//! The router keeps a compiled table of the declared ingress rules, rebuilt
//! whenever an IngressRule resource changes. Matching is per exact host:
//! the longest path prefix wins, prefixes only match on whole segment
//! boundaries, and equal-length ties go to the rule declared first.
//! Routing never blocks on the store; it reads the last compiled table.

use crate::error::{IngressError, Result};
use keel_registry::ServiceRegistry;
use keel_store::{watch, ResourceStore, StoreResult};
use keel_types::{
    Endpoint, EventSource, KeelEvent, KeelEventEnvelope, ResourceKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Which rule matched and where it points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Target service name.
    pub service: String,
    /// Host the winning rule was declared for.
    pub host: String,
    /// Path prefix of the winning rule.
    pub path_prefix: String,
}

/// A decision plus one live endpoint picked from the target service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRoute {
    pub decision: RouteDecision,
    pub endpoint: Endpoint,
}

struct CompiledRule {
    path_prefix: String,
    service: String,
}

/// Maps external (host, path) pairs to services and live endpoints.
pub struct IngressRouter {
    store: Arc<dyn ResourceStore>,
    registry: Arc<ServiceRegistry>,
    /// Per-host rules in declaration order.
    rules: RwLock<HashMap<String, Vec<CompiledRule>>>,
    event_tx: Option<broadcast::Sender<KeelEventEnvelope>>,
}

impl IngressRouter {
    pub fn new(store: Arc<dyn ResourceStore>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            store,
            registry,
            rules: RwLock::new(HashMap::new()),
            event_tx: None,
        }
    }

    /// Emit a reload event on every rule-table rebuild.
    pub fn with_events(mut self, event_tx: broadcast::Sender<KeelEventEnvelope>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Load the rule table, then rebuild it on every IngressRule change
    /// until the store's feed closes.
    pub async fn start(self: Arc<Self>) {
        // Cursor first: a rule applied between reload and subscribe shows
        // up in the feed, and a rebuild is idempotent.
        let cursor = match self.store.next_cursor(ResourceKind::IngressRule).await {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                warn!(error = %e, "cursor unavailable, subscribing from head");
                None
            }
        };

        if let Err(e) = self.reload().await {
            warn!(error = %e, "initial ingress rule load failed");
        }

        let mut subscription =
            match watch(Arc::clone(&self.store), ResourceKind::IngressRule, cursor).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(error = %e, "failed to open ingress rule watch");
                    return;
                }
            };

        while let Some(event) = subscription.next().await {
            debug!(rule = %event.key.name, change = ?event.change, "ingress rule changed");
            if let Err(e) = self.reload().await {
                warn!(error = %e, "ingress rule reload failed");
            }
        }
    }

    /// Rebuild the compiled table from the currently declared rules.
    pub async fn reload(&self) -> StoreResult<()> {
        let resources = self.store.list(ResourceKind::IngressRule).await?;

        // list() returns declaration order, so per-host vectors keep it.
        let mut table: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        let mut count = 0usize;
        for resource in &resources {
            if let Some(spec) = resource.spec.as_ingress_rule() {
                table
                    .entry(spec.host.clone())
                    .or_default()
                    .push(CompiledRule {
                        path_prefix: normalize_prefix(&spec.path_prefix),
                        service: spec.service.clone(),
                    });
                count += 1;
            }
        }

        let mut rules = self.rules.write().unwrap_or_else(|p| p.into_inner());
        *rules = table;
        drop(rules);

        debug!(rules = count, "ingress rule table reloaded");
        self.emit(KeelEvent::RulesReloaded { rules: count });
        Ok(())
    }

    /// Pick the winning rule for (host, path).
    pub fn route(&self, host: &str, path: &str) -> Result<RouteDecision> {
        let rules = self.rules.read().unwrap_or_else(|p| p.into_inner());
        let no_match = || IngressError::NoMatchingRule {
            host: host.to_string(),
            path: path.to_string(),
        };

        let host_rules = rules.get(host).ok_or_else(no_match)?;

        // Strictly-greater keeps the first declared rule on length ties.
        let mut best: Option<&CompiledRule> = None;
        for rule in host_rules {
            if !prefix_matches(&rule.path_prefix, path) {
                continue;
            }
            let better = match best {
                Some(current) => rule.path_prefix.len() > current.path_prefix.len(),
                None => true,
            };
            if better {
                best = Some(rule);
            }
        }

        let rule = best.ok_or_else(no_match)?;
        Ok(RouteDecision {
            service: rule.service.clone(),
            host: host.to_string(),
            path_prefix: rule.path_prefix.clone(),
        })
    }

    /// Route, then pick a Ready endpoint from the target service. A
    /// matched rule whose service is missing or empty is
    /// [`IngressError::ServiceUnavailable`], distinct from no rule at all.
    pub fn resolve(&self, host: &str, path: &str) -> Result<ResolvedRoute> {
        let decision = self.route(host, path)?;
        match self.registry.pick(&decision.service) {
            Ok(Some(endpoint)) => Ok(ResolvedRoute { decision, endpoint }),
            Ok(None) | Err(_) => Err(IngressError::ServiceUnavailable {
                service: decision.service,
            }),
        }
    }

    /// Number of rules in the compiled table.
    pub fn rule_count(&self) -> usize {
        let rules = self.rules.read().unwrap_or_else(|p| p.into_inner());
        rules.values().map(Vec::len).sum()
    }

    fn emit(&self, event: KeelEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(KeelEventEnvelope::new(event, EventSource::Ingress));
        }
    }
}

/// `/api` matches `/api` and `/api/x` but never `/apix`; `/` matches
/// every path.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Trailing slashes would defeat the segment-boundary check, so `/api/`
/// compiles to `/api`. The root prefix stays `/`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_registry::MemoryInstanceRegistry;
    use keel_store::MemoryResourceStore;
    use keel_types::{
        IngressRuleSpec, Instance, InstanceHealth, InstanceId, ResourceSpec, ServiceSpec,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn rule(host: &str, prefix: &str, service: &str) -> ResourceSpec {
        ResourceSpec::IngressRule(IngressRuleSpec {
            host: host.to_string(),
            path_prefix: prefix.to_string(),
            service: service.to_string(),
        })
    }

    fn service_spec(workload: &str) -> ServiceSpec {
        ServiceSpec {
            selector: BTreeMap::from([("workload".to_string(), workload.to_string())]),
            target_port: 9000,
        }
    }

    fn ready_instance(workload: &str) -> Instance {
        Instance {
            id: InstanceId::generate(),
            workload: workload.to_string(),
            workload_generation: 1,
            labels: BTreeMap::from([("workload".to_string(), workload.to_string())]),
            address: "127.0.0.2".to_string(),
            port: 8080,
            health: InstanceHealth::Ready,
            pins: Vec::new(),
            started_at: chrono::Utc::now(),
        }
    }

    struct Fixture {
        router: Arc<IngressRouter>,
        store: Arc<MemoryResourceStore>,
        registry: Arc<ServiceRegistry>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryResourceStore::new());
        let registry = Arc::new(ServiceRegistry::new(Arc::new(
            MemoryInstanceRegistry::new(),
        )));
        let router = Arc::new(IngressRouter::new(
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            Arc::clone(&registry),
        ));
        Fixture {
            router,
            store,
            registry,
        }
    }

    #[tokio::test]
    async fn test_longest_prefix_wins_over_root() {
        let f = fixture();
        f.store
            .put("web-root", rule("shop.test", "/", "web"))
            .await
            .unwrap();
        f.store
            .put("api", rule("shop.test", "/api", "api"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        let decision = f.router.route("shop.test", "/api/x").unwrap();
        assert_eq!(decision.service, "api");
        assert_eq!(decision.path_prefix, "/api");

        assert_eq!(f.router.route("shop.test", "/api").unwrap().service, "api");
        assert_eq!(f.router.route("shop.test", "/").unwrap().service, "web");
        assert_eq!(
            f.router.route("shop.test", "/checkout").unwrap().service,
            "web"
        );
    }

    #[tokio::test]
    async fn test_prefix_matches_whole_segments_only() {
        let f = fixture();
        f.store
            .put("api", rule("shop.test", "/api", "api"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        assert_eq!(f.router.route("shop.test", "/api/v1").unwrap().service, "api");
        assert_eq!(f.router.route("shop.test", "/api/").unwrap().service, "api");

        // `/apix` shares the byte prefix but not the segment.
        let err = f.router.route("shop.test", "/apix").unwrap_err();
        assert!(matches!(err, IngressError::NoMatchingRule { .. }));
    }

    #[tokio::test]
    async fn test_equal_length_tie_goes_to_first_declared() {
        let f = fixture();
        f.store
            .put("a-api", rule("shop.test", "/api", "first"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        f.store
            .put("b-api", rule("shop.test", "/api", "second"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        assert_eq!(f.router.route("shop.test", "/api").unwrap().service, "first");
    }

    #[tokio::test]
    async fn test_unknown_host_has_no_rule() {
        let f = fixture();
        f.store
            .put("api", rule("shop.test", "/", "web"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        let err = f.router.route("other.test", "/").unwrap_err();
        assert!(matches!(err, IngressError::NoMatchingRule { .. }));
    }

    #[tokio::test]
    async fn test_trailing_slash_in_declared_prefix_is_normalized() {
        let f = fixture();
        f.store
            .put("api", rule("shop.test", "/api/", "api"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        assert_eq!(f.router.route("shop.test", "/api").unwrap().service, "api");
        assert_eq!(f.router.route("shop.test", "/api/v1").unwrap().service, "api");
        assert!(f.router.route("shop.test", "/apix").is_err());
    }

    #[tokio::test]
    async fn test_resolve_distinguishes_unavailable_from_unmatched() {
        let f = fixture();
        f.store
            .put("api", rule("shop.test", "/api", "api"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        // Rule matches, but nothing backs the service.
        let err = f.router.resolve("shop.test", "/api").unwrap_err();
        assert!(matches!(
            err,
            IngressError::ServiceUnavailable { ref service } if service == "api"
        ));

        // Service declared but with zero Ready endpoints: still unavailable.
        f.registry
            .upsert_service("api", service_spec("api"))
            .await
            .unwrap();
        let err = f.router.resolve("shop.test", "/api").unwrap_err();
        assert!(matches!(err, IngressError::ServiceUnavailable { .. }));

        // No rule at all is the other error.
        let err = f.router.resolve("shop.test", "/nope").unwrap_err();
        assert!(matches!(err, IngressError::NoMatchingRule { .. }));
    }

    #[tokio::test]
    async fn test_resolve_returns_a_ready_endpoint() {
        let f = fixture();
        f.store
            .put("api", rule("shop.test", "/api", "api"))
            .await
            .unwrap();
        f.router.reload().await.unwrap();

        f.registry
            .upsert_service("api", service_spec("api"))
            .await
            .unwrap();
        f.registry
            .register_instance(ready_instance("api"))
            .await
            .unwrap();

        let resolved = f.router.resolve("shop.test", "/api/v1").unwrap();
        assert_eq!(resolved.decision.service, "api");
        assert_eq!(resolved.endpoint.address, "127.0.0.2");
        assert_eq!(resolved.endpoint.port, 9000);
    }

    #[tokio::test]
    async fn test_watch_rebuilds_table_on_rule_changes() {
        let f = fixture();
        tokio::spawn(Arc::clone(&f.router).start());

        f.store
            .put("api", rule("shop.test", "/api", "api"))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while f.router.route("shop.test", "/api").is_err() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "rule never became routable"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        f.store
            .delete(ResourceKind::IngressRule, "api")
            .await
            .unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while f.router.route("shop.test", "/api").is_ok() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "deleted rule still routes"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.router.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_reload_emits_rules_reloaded() {
        let (tx, mut rx) = broadcast::channel(16);
        let store = Arc::new(MemoryResourceStore::new());
        let registry = Arc::new(ServiceRegistry::new(Arc::new(
            MemoryInstanceRegistry::new(),
        )));
        let router = IngressRouter::new(
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            registry,
        )
        .with_events(tx);

        store
            .put("api", rule("shop.test", "/api", "api"))
            .await
            .unwrap();
        router.reload().await.unwrap();

        let envelope = rx.try_recv().unwrap();
        assert!(matches!(
            envelope.event,
            KeelEvent::RulesReloaded { rules: 1 }
        ));
    }
}
