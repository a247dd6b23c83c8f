// Error handling module for the API
// Provides the boundary error type and HTTP response conversion

use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

use crate::auth::AuthError;

/// Main error type for the API
/// All handlers return Result<T, ApiError>
#[derive(Debug)]
pub enum ApiError {
    /// Authentication failures, redacted through `AuthError::public_error`
    Auth(AuthError),

    /// Route or resource does not exist
    /// Maps to HTTP 404 Not Found
    NotFound { resource: String },

    /// Request body could not be read into the expected shape
    /// Maps to HTTP 400 with the `VALIDATION_ERROR` code
    MalformedBody { field: &'static str, reason: String },
}

/// Consistent error response structure
///
/// Provides both a machine-readable `error_code` and a human-readable `message`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,

    /// Field-level validation errors; omitted when None
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,

    /// ISO 8601 timestamp of when the error occurred
    pub timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = self.to_error_response();
        (status, Json(error_response)).into_response()
    }
}

impl ApiError {
    /// Convert ApiError to HTTP status code and ErrorResponse
    ///
    /// Server faults are logged at error level with their full context; the
    /// client only ever receives the redacted message.
    fn to_error_response(&self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::Auth(auth_error) => {
                let public = auth_error.public_error();

                if public.status.is_server_error() {
                    error!("Auth request failed: {}", auth_error);
                } else if public.status == StatusCode::UNAUTHORIZED
                    || public.status == StatusCode::FORBIDDEN
                {
                    warn!("Auth request rejected: {}", auth_error);
                } else {
                    debug!("Auth request rejected: {}", auth_error);
                }

                let details = match auth_error {
                    AuthError::ValidationError(errors) => {
                        Some(serde_json::to_value(errors).unwrap_or(serde_json::json!({})))
                    }
                    _ => None,
                };

                (
                    public.status,
                    ErrorResponse {
                        error_code: public.code.to_string(),
                        message: public.message.to_string(),
                        details,
                        timestamp: Utc::now().to_rfc3339(),
                    },
                )
            }
            ApiError::NotFound { resource } => {
                debug!("Resource not found: {}", resource);

                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse {
                        error_code: "NOT_FOUND".to_string(),
                        message: format!("{} not found", resource),
                        details: None,
                        timestamp: Utc::now().to_rfc3339(),
                    },
                )
            }
            ApiError::MalformedBody { field, reason } => {
                debug!("Malformed request body: {}", reason);

                let mut details = serde_json::Map::new();
                details.insert(
                    field.to_string(),
                    serde_json::json!([{ "code": "malformed", "message": reason }]),
                );

                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse {
                        error_code: "VALIDATION_ERROR".to_string(),
                        message: "Invalid request body".to_string(),
                        details: Some(serde_json::Value::Object(details)),
                        timestamp: Utc::now().to_rfc3339(),
                    },
                )
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        ApiError::Auth(error)
    }
}

/// A JSON body that failed to parse or bind
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedBody {
            field: "body",
            reason: rejection.body_text(),
        }
    }
}

/// A request that is not a readable multipart form
impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::MalformedBody {
            field: "body",
            reason: rejection.body_text(),
        }
    }
}

/// Convert validator errors to ApiError
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Auth(AuthError::ValidationError(errors))
    }
}
