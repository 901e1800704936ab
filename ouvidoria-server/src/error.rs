//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::lifecycle::LifecycleError;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Lifecycle failure; status depends on the variant
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Map a failure of a mutating operation.
    ///
    /// Mutations report a missing manifestation as a bad request, the same
    /// way they report a manifestation in the wrong state.
    pub fn mutation(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound => Self::BadRequest(err.to_string()),
            other => Self::Lifecycle(other),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Lifecycle(ref e) => match e {
                // Client-correctable input or state → 400
                LifecycleError::Validation(_) | LifecycleError::InvalidState { .. } => {
                    StatusCode::BAD_REQUEST
                }

                LifecycleError::NotFound => StatusCode::NOT_FOUND,

                // Pool exhaustion and dropped connections → 503
                LifecycleError::Repository(r) if r.is_transient() => {
                    StatusCode::SERVICE_UNAVAILABLE
                }

                LifecycleError::Storage(_) | LifecycleError::Repository(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Lifecycle(ref e) => match e {
                LifecycleError::Validation(_) => "VALIDATION_ERROR",
                LifecycleError::NotFound => "NOT_FOUND",
                LifecycleError::InvalidState { .. } => "INVALID_STATE",
                LifecycleError::Storage(_) => "STORAGE_ERROR",
                LifecycleError::Repository(RepositoryError::ProtocolConflict(_)) => {
                    "PROTOCOL_CONFLICT"
                }
                LifecycleError::Repository(r) if r.is_transient() => "DATABASE_UNAVAILABLE",
                LifecycleError::Repository(_) => "DATABASE_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            // Storage and database details stay in the logs
            Self::Lifecycle(LifecycleError::Storage(_)) => {
                "Attachment storage failed".to_string()
            }
            Self::Lifecycle(LifecycleError::Repository(RepositoryError::ProtocolConflict(_))) => {
                "Could not allocate a protocol, try again".to_string()
            }
            Self::Lifecycle(LifecycleError::Repository(r)) if r.is_transient() => {
                "Database temporarily unavailable".to_string()
            }
            Self::Lifecycle(LifecycleError::Repository(_)) => "Database error".to_string(),
            // For other errors, use the Display message
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal",
            Self::Lifecycle(_) => "lifecycle",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                client_message = %client_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use ouvidoria_core::ManifestationStatus;

    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_lifecycle_status_mapping() {
        let validation = ApiError::from(LifecycleError::Validation("empty".into()));
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.error_code(), "VALIDATION_ERROR");

        let state = ApiError::from(LifecycleError::InvalidState {
            operation: "submit",
            status: ManifestationStatus::Received,
        });
        assert_eq!(state.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(state.error_code(), "INVALID_STATE");

        let storage = ApiError::from(LifecycleError::Storage(StorageError::Integrity {
            expected: 4,
            actual: 3,
        }));
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.client_message(), "Attachment storage failed");
    }

    #[test]
    fn test_not_found_depends_on_operation() {
        assert_eq!(
            ApiError::from(LifecycleError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::mutation(LifecycleError::NotFound).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_repository_details_are_hidden() {
        let err = ApiError::from(LifecycleError::Repository(RepositoryError::Migration(
            "relation \"manifestations\" already exists".into(),
        )));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "Database error");
    }
}
