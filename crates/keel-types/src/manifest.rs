//! Declarative resource documents
//!
//! Operators describe desired state in YAML manifests. A manifest holds one
//! or more documents separated by `---`; each names a kind, a resource name,
//! and a kind-specific spec. Applying a document is a store `put`.
//!
//! ```yaml
//! apiVersion: keel/v1
//! kind: Workload
//! name: api
//! spec:
//!   image: registry.local/api:1.4
//!   replicas: 3
//!   port: 8080
//!   env:
//!     - name: DB_URI
//!       secretKey: { name: db-credentials, key: uri }
//! ```

use crate::resource::{ResourceKind, ResourceSpec};
use crate::spec::{
    ConfigMapSpec, IngressRuleSpec, SecretSpec, ServiceSpec, SpecValidationError, WorkloadSpec,
};
use serde::{Deserialize, Serialize};

/// The only manifest schema version in use.
pub const API_VERSION: &str = "keel/v1";

/// One parsed manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDoc {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    pub kind: String,

    pub name: String,

    /// Kind-specific body, decoded by [`ManifestDoc::into_spec`].
    pub spec: serde_yaml::Value,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

impl ManifestDoc {
    /// Decode and validate the document into a (name, spec) pair.
    pub fn into_spec(self) -> Result<(String, ResourceSpec), ManifestError> {
        if self.api_version != API_VERSION {
            return Err(ManifestError::UnsupportedApiVersion(self.api_version));
        }

        let kind: ResourceKind = self
            .kind
            .parse()
            .map_err(|_| ManifestError::UnknownKind(self.kind.clone()))?;

        let spec = match kind {
            ResourceKind::Secret => {
                let spec: SecretSpec = serde_yaml::from_value(self.spec)?;
                spec.validate()?;
                ResourceSpec::Secret(spec)
            }
            ResourceKind::ConfigMap => {
                let spec: ConfigMapSpec = serde_yaml::from_value(self.spec)?;
                spec.validate()?;
                ResourceSpec::ConfigMap(spec)
            }
            ResourceKind::Workload => {
                let spec: WorkloadSpec = serde_yaml::from_value(self.spec)?;
                spec.validate()?;
                ResourceSpec::Workload(spec)
            }
            ResourceKind::Service => {
                let spec: ServiceSpec = serde_yaml::from_value(self.spec)?;
                spec.validate()?;
                ResourceSpec::Service(spec)
            }
            ResourceKind::IngressRule => {
                let spec: IngressRuleSpec = serde_yaml::from_value(self.spec)?;
                spec.validate()?;
                ResourceSpec::IngressRule(spec)
            }
        };

        if self.name.is_empty() {
            return Err(ManifestError::Validation(SpecValidationError::EmptyField(
                "name",
            )));
        }

        Ok((self.name, spec))
    }
}

/// Parse a multi-document YAML manifest. Empty documents are skipped.
pub fn parse_manifest(input: &str) -> Result<Vec<ManifestDoc>, ManifestError> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(de)?;
        if value.is_null() {
            continue;
        }
        docs.push(serde_yaml::from_value(value)?);
    }
    Ok(docs)
}

/// Manifest parsing and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("unsupported apiVersion: {0}")]
    UnsupportedApiVersion(String),

    #[error("invalid spec: {0}")]
    Validation(#[from] SpecValidationError),
}
