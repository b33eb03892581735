//! Error types for keel-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keel_ingress::IngressError;
use keel_registry::RegistryError;
use keel_store::StoreError;
use keel_types::ManifestError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No backend can take the request right now
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::GenerationCollected { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            StoreError::Corruption(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ServiceNotFound(_) | RegistryError::InstanceNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            RegistryError::InstanceAlreadyExists(_) => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<IngressError> for ApiError {
    fn from(err: IngressError) -> Self {
        match err {
            IngressError::NoMatchingRule { .. } => ApiError::NotFound(err.to_string()),
            IngressError::ServiceUnavailable { .. } => {
                ApiError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

impl From<ManifestError> for ApiError {
    fn from(err: ManifestError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{ResourceKey, ResourceKind};

    #[test]
    fn test_api_error_status_codes() {
        assert!(matches!(
            ApiError::NotFound("test".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        ));

        assert!(matches!(
            ApiError::BadRequest("test".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        ));

        assert!(matches!(
            ApiError::Conflict("test".to_string())
                .into_response()
                .status(),
            StatusCode::CONFLICT
        ));

        assert!(matches!(
            ApiError::ServiceUnavailable("test".to_string())
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[test]
    fn test_store_errors_map_to_api_errors() {
        let not_found = StoreError::not_found(ResourceKind::Workload, "api");
        assert!(matches!(ApiError::from(not_found), ApiError::NotFound(_)));

        let conflict = StoreError::Conflict {
            key: ResourceKey::new(ResourceKind::Workload, "api"),
            expected: 2,
            actual: 3,
        };
        assert!(matches!(ApiError::from(conflict), ApiError::Conflict(_)));

        let corruption = StoreError::Corruption("bad entry".to_string());
        assert!(matches!(ApiError::from(corruption), ApiError::Internal(_)));
    }

    #[test]
    fn test_ingress_errors_split_between_404_and_503() {
        let no_rule = IngressError::NoMatchingRule {
            host: "example.com".to_string(),
            path: "/x".to_string(),
        };
        assert_eq!(
            ApiError::from(no_rule).into_response().status(),
            StatusCode::NOT_FOUND
        );

        let unavailable = IngressError::ServiceUnavailable {
            service: "api".to_string(),
        };
        assert_eq!(
            ApiError::from(unavailable).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
