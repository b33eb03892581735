//! Spec documents for the five resource kinds
//!
//! A spec describes desired state only. Observed state (instances, endpoint
//! sets, workload phases) lives with the components that own it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secret payload: named string values, write-only through the operator
/// surface (listings redact the values, returning key names only).
///
/// Secrets are immutable by identity: applying a changed payload creates a
/// new generation and running consumers keep the generation they started
/// with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub data: BTreeMap<String, String>,
}

impl SecretSpec {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        validate_data_keys(&self.data)
    }
}

/// Plain configuration payload. Same identity rules as [`SecretSpec`],
/// without redaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapSpec {
    pub data: BTreeMap<String, String>,
}

impl ConfigMapSpec {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        validate_data_keys(&self.data)
    }
}

/// Where an environment variable's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvSource {
    /// A key inside a named Secret.
    SecretKey { name: String, key: String },
    /// A key inside a named ConfigMap.
    ConfigKey { name: String, key: String },
}

impl EnvSource {
    /// Name of the referenced resource.
    pub fn resource_name(&self) -> &str {
        match self {
            EnvSource::SecretKey { name, .. } => name,
            EnvSource::ConfigKey { name, .. } => name,
        }
    }

    /// Kind of the referenced resource.
    pub fn resource_kind(&self) -> crate::resource::ResourceKind {
        match self {
            EnvSource::SecretKey { .. } => crate::resource::ResourceKind::Secret,
            EnvSource::ConfigKey { .. } => crate::resource::ResourceKind::ConfigMap,
        }
    }
}

/// One environment variable binding in a workload spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvBinding {
    /// Environment variable name as seen by the process.
    pub name: String,

    /// Source reference resolved at materialization time.
    #[serde(flatten)]
    pub source: EnvSource,
}

/// Specification of a replicated process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Container image reference handed to the runtime collaborator.
    pub image: String,

    /// Desired number of running instances.
    pub replicas: u32,

    /// Port the process listens on.
    pub port: u16,

    /// Environment bindings, all of which must resolve before any instance
    /// starts.
    #[serde(default)]
    pub env: Vec<EnvBinding>,
}

impl WorkloadSpec {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.image.is_empty() {
            return Err(SpecValidationError::EmptyField("image"));
        }
        if self.port == 0 {
            return Err(SpecValidationError::InvalidPort);
        }

        let mut seen = std::collections::BTreeSet::new();
        for binding in &self.env {
            if binding.name.is_empty() {
                return Err(SpecValidationError::EmptyField("env name"));
            }
            if !seen.insert(binding.name.as_str()) {
                return Err(SpecValidationError::DuplicateEnvVar(binding.name.clone()));
            }
        }

        Ok(())
    }

    /// Identity of the instance template: image, port, and env bindings.
    /// Replica count is excluded so a pure scale change keeps existing
    /// instances instead of replacing them.
    pub fn template_hash(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.image.hash(&mut hasher);
        self.port.hash(&mut hasher);
        self.env.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// A named, selector-based view over instances. Services own no instances;
/// the registry computes their endpoint sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Label predicate over instances. Every (key, value) pair must match.
    pub selector: BTreeMap<String, String>,

    /// Port published in endpoint snapshots.
    pub target_port: u16,
}

impl ServiceSpec {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.selector.is_empty() {
            return Err(SpecValidationError::EmptyField("selector"));
        }
        if self.target_port == 0 {
            return Err(SpecValidationError::InvalidPort);
        }
        Ok(())
    }

    /// True when every selector pair is present in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selector
            .iter()
            .all(|(k, v)| labels.get(k).map(String::as_str) == Some(v.as_str()))
    }
}

/// One external routing rule: (host, path prefix) to a service name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRuleSpec {
    pub host: String,

    /// Path prefix matched on whole segments; `/` matches everything.
    pub path_prefix: String,

    /// Target service name.
    pub service: String,
}

impl IngressRuleSpec {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.host.is_empty() {
            return Err(SpecValidationError::EmptyField("host"));
        }
        if self.service.is_empty() {
            return Err(SpecValidationError::EmptyField("service"));
        }
        if !self.path_prefix.starts_with('/') {
            return Err(SpecValidationError::InvalidPathPrefix(
                self.path_prefix.clone(),
            ));
        }
        Ok(())
    }
}

fn validate_data_keys(data: &BTreeMap<String, String>) -> Result<(), SpecValidationError> {
    for key in data.keys() {
        if key.is_empty() {
            return Err(SpecValidationError::EmptyField("data key"));
        }
    }
    Ok(())
}

/// Spec validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecValidationError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("port must be > 0")]
    InvalidPort,

    #[error("duplicate env var: {0}")]
    DuplicateEnvVar(String),

    #[error("path prefix must start with '/': {0}")]
    InvalidPathPrefix(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            image: "registry.local/api:1.4".to_string(),
            replicas: 2,
            port: 8080,
            env: vec![EnvBinding {
                name: "DB_URI".to_string(),
                source: EnvSource::SecretKey {
                    name: "db-credentials".to_string(),
                    key: "uri".to_string(),
                },
            }],
        }
    }

    #[test]
    fn test_workload_validates() {
        assert!(workload().validate().is_ok());
    }

    #[test]
    fn test_workload_rejects_duplicate_env() {
        let mut spec = workload();
        spec.env.push(spec.env[0].clone());
        assert!(matches!(
            spec.validate(),
            Err(SpecValidationError::DuplicateEnvVar(_))
        ));
    }

    #[test]
    fn test_workload_rejects_port_zero() {
        let mut spec = workload();
        spec.port = 0;
        assert!(matches!(spec.validate(), Err(SpecValidationError::InvalidPort)));
    }

    #[test]
    fn test_selector_matches_subset() {
        let spec = ServiceSpec {
            selector: BTreeMap::from([("workload".to_string(), "api".to_string())]),
            target_port: 8080,
        };

        let mut labels = BTreeMap::from([
            ("workload".to_string(), "api".to_string()),
            ("tier".to_string(), "backend".to_string()),
        ]);
        assert!(spec.matches(&labels));

        labels.insert("workload".to_string(), "worker".to_string());
        assert!(!spec.matches(&labels));
    }

    #[test]
    fn test_ingress_rule_requires_rooted_prefix() {
        let rule = IngressRuleSpec {
            host: "shop.example.com".to_string(),
            path_prefix: "api".to_string(),
            service: "api".to_string(),
        };
        assert!(matches!(
            rule.validate(),
            Err(SpecValidationError::InvalidPathPrefix(_))
        ));
    }

    #[test]
    fn test_env_binding_serde_shape() {
        let binding = EnvBinding {
            name: "DB_URI".to_string(),
            source: EnvSource::SecretKey {
                name: "db-credentials".to_string(),
                key: "uri".to_string(),
            },
        };
        let json = serde_json::to_value(&binding).unwrap();
        // Flattened source: {"name": ..., "secretKey": {...}}
        assert!(json.get("secretKey").is_some());
        assert_eq!(json["name"], "DB_URI");
    }

    #[test]
    fn test_template_hash_ignores_replicas() {
        let mut spec = WorkloadSpec {
            image: "registry.local/api:1".to_string(),
            replicas: 3,
            port: 8080,
            env: Vec::new(),
        };
        let hash = spec.template_hash();

        spec.replicas = 1;
        assert_eq!(spec.template_hash(), hash);

        spec.image = "registry.local/api:2".to_string();
        assert_ne!(spec.template_hash(), hash);
    }
}
