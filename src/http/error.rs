//! JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::registry::RegistryError;

/// Error returned by admin handlers and the proxy fallback.
#[derive(Debug)]
pub enum AppError {
    Registry(RegistryError),
    /// Malformed request (bad JSON, non-numeric id).
    BadRequest(String),
    /// The caller has no registered client.
    NotRegistered(String),
    /// The caller's client is disabled.
    ProxyDisabled,
    /// Forwarding to the target failed.
    Upstream(String),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::Registry(err)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Registry(RegistryError::Validation(_)) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Registry(RegistryError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Registry(RegistryError::NotFound(_)) | AppError::NotRegistered(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::Registry(RegistryError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ProxyDisabled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            // Storage details stay in the logs.
            AppError::Registry(RegistryError::Persistence(_)) => {
                "failed to save configuration".to_string()
            }
            AppError::Registry(err) => err.to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::NotRegistered(ip) => format!("no client registered for {ip}"),
            AppError::ProxyDisabled => "proxy service is disabled".to_string(),
            AppError::Upstream(_) => "upstream request failed".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = ?self, "Request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PersistenceError;
    use std::sync::Arc;

    #[test]
    fn test_status_per_error_kind() {
        let cases = [
            (AppError::from(RegistryError::Validation("x".into())), StatusCode::BAD_REQUEST),
            (AppError::from(RegistryError::Conflict("x".into())), StatusCode::CONFLICT),
            (AppError::from(RegistryError::NotFound(3)), StatusCode::NOT_FOUND),
            (
                AppError::from(RegistryError::Persistence(Arc::new(PersistenceError::Closed))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotRegistered("198.51.100.1".into()), StatusCode::NOT_FOUND),
            (AppError::ProxyDisabled, StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Upstream("refused".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_persistence_details_are_not_exposed() {
        let err = AppError::from(RegistryError::Persistence(Arc::new(PersistenceError::Invalid(
            "/secret/path".into(),
        ))));
        assert_eq!(err.message(), "failed to save configuration");
        assert_eq!(
            AppError::from(RegistryError::NotFound(7)).message(),
            "client 7 not found"
        );
    }
}
