//! Secret/Config env materialization
//!
//! Resolution is read-only against the store and never creates resources:
//! a missing reference is surfaced as [`MaterializeError::UnresolvedReference`]
//! and it is the operator's job to apply the missing Secret/ConfigMap. The
//! resolved env carries the generation refs it was read from so instances
//! can pin them for the lifetime of the process.

use crate::error::MaterializeError;
use keel_store::{ResourceStore, StoreError};
use keel_types::{EnvSource, GenerationRef, ResourceSpec, WorkloadSpec};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A fully resolved environment plus the generations it was read from.
#[derive(Debug, Clone)]
pub struct MaterializedEnv {
    /// Variable name to value, stable order.
    pub vars: BTreeMap<String, String>,

    /// Generations the values came from, one entry per referenced resource.
    pub pins: Vec<GenerationRef>,
}

/// Resolves workload env bindings against the store's current generations.
#[derive(Clone)]
pub struct Materializer {
    store: Arc<dyn ResourceStore>,
}

impl Materializer {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Resolve every env binding against the current generation of its
    /// referenced resource. Collects all missing references into one error
    /// so the operator sees the complete list at once.
    pub async fn resolve(&self, spec: &WorkloadSpec) -> Result<MaterializedEnv, MaterializeError> {
        let mut vars = BTreeMap::new();
        let mut pins: Vec<GenerationRef> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        for binding in &spec.env {
            let kind = binding.source.resource_kind();
            let name = binding.source.resource_name();

            let resource = match self.store.get(kind, name).await {
                Ok(resource) => resource,
                Err(StoreError::NotFound { .. }) => {
                    missing.push(format!("{}/{}", kind, name));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let (data, key) = match (&resource.spec, &binding.source) {
                (ResourceSpec::Secret(s), EnvSource::SecretKey { key, .. }) => (&s.data, key),
                (ResourceSpec::ConfigMap(c), EnvSource::ConfigKey { key, .. }) => (&c.data, key),
                _ => {
                    missing.push(format!("{}/{}", kind, name));
                    continue;
                }
            };

            match data.get(key) {
                Some(value) => {
                    vars.insert(binding.name.clone(), value.clone());
                    let generation_ref = GenerationRef {
                        kind,
                        name: name.to_string(),
                        generation: resource.generation,
                    };
                    if !pins.contains(&generation_ref) {
                        pins.push(generation_ref);
                    }
                }
                None => missing.push(format!("{}/{}:{}", kind, name, key)),
            }
        }

        if !missing.is_empty() {
            return Err(MaterializeError::UnresolvedReference { references: missing });
        }

        Ok(MaterializedEnv { vars, pins })
    }

    /// Re-resolve bindings against explicitly pinned generations instead of
    /// current ones. Fails with [`MaterializeError::VersionPinned`] when a
    /// pinned generation has been garbage-collected.
    pub async fn resolve_pinned(
        &self,
        spec: &WorkloadSpec,
        pins: &[GenerationRef],
    ) -> Result<BTreeMap<String, String>, MaterializeError> {
        let mut vars = BTreeMap::new();
        let mut missing: Vec<String> = Vec::new();

        for binding in &spec.env {
            let kind = binding.source.resource_kind();
            let name = binding.source.resource_name();

            let Some(pin) = pins.iter().find(|p| p.kind == kind && p.name == name) else {
                missing.push(format!("{}/{}", kind, name));
                continue;
            };

            let resource = match self.store.get_generation(kind, name, pin.generation).await {
                Ok(resource) => resource,
                Err(StoreError::GenerationCollected { .. }) => {
                    return Err(MaterializeError::VersionPinned {
                        reference: pin.clone(),
                    });
                }
                Err(StoreError::NotFound { .. }) => {
                    missing.push(format!("{}/{}", kind, name));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let (data, key) = match (&resource.spec, &binding.source) {
                (ResourceSpec::Secret(s), EnvSource::SecretKey { key, .. }) => (&s.data, key),
                (ResourceSpec::ConfigMap(c), EnvSource::ConfigKey { key, .. }) => (&c.data, key),
                _ => {
                    missing.push(format!("{}/{}", kind, name));
                    continue;
                }
            };

            match data.get(key) {
                Some(value) => {
                    vars.insert(binding.name.clone(), value.clone());
                }
                None => missing.push(format!("{}/{}:{}", kind, name, key)),
            }
        }

        if !missing.is_empty() {
            return Err(MaterializeError::UnresolvedReference { references: missing });
        }

        Ok(vars)
    }

    /// Pin each resolved generation, one refcount per instance that will
    /// hold the env. Rolls back on failure so refcounts stay balanced. A
    /// generation collected between resolve and pin maps to `VersionPinned`.
    pub async fn pin_all(&self, pins: &[GenerationRef]) -> Result<(), MaterializeError> {
        for (i, pin) in pins.iter().enumerate() {
            if let Err(e) = self.store.pin(pin).await {
                for held in &pins[..i] {
                    let _ = self.store.unpin(held).await;
                }
                return match e {
                    StoreError::GenerationCollected { .. } => {
                        Err(MaterializeError::VersionPinned {
                            reference: pin.clone(),
                        })
                    }
                    other => Err(other.into()),
                };
            }
        }
        Ok(())
    }

    /// Release one refcount per ref. Best-effort: unmatched unpins are
    /// logged by the store, not errored.
    pub async fn unpin_all(&self, pins: &[GenerationRef]) {
        for pin in pins {
            let _ = self.store.unpin(pin).await;
        }
    }
}
