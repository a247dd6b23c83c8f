// Authentication and authorization error types
//
// `AuthError` keeps the precise internal reason so callers and tests can match
// on it. What leaves the process is decided by `AuthError::public_error`, the
// single redaction table for this module.

use axum::http::StatusCode;
use thiserror::Error;

/// Message shown for any unknown, expired or already used token
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token";
/// Message shown for unknown accounts and wrong passwords alike
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";
pub const EMAIL_NOT_VERIFIED_MESSAGE: &str =
    "Please verify your email address before signing in";
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Token unknown, expired, consumed, or issued for another purpose
    #[error("Invalid token")]
    InvalidToken,

    /// No account for the email, or the account has no password (OAuth only)
    #[error("User not found")]
    UserNotFound,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Email already exists")]
    EmailAlreadyExists,

    /// Password change with a wrong current password
    #[error("Incorrect current password")]
    CurrentPasswordMismatch,

    /// Password change on an account that never had one
    #[error("No password set for account")]
    PasswordNotSet,

    #[error("Missing or invalid session")]
    Unauthenticated,

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Email delivery failed: {0}")]
    EmailDeliveryFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Password hashing error")]
    PasswordHashError,

    #[error("Token generation error: {0}")]
    TokenGenerationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::DatabaseError(err.to_string())
    }
}

/// Client-facing rendering of an `AuthError`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: &'static str,
}

impl PublicError {
    const fn new(status: StatusCode, code: &'static str, message: &'static str) -> Self {
        Self { status, code, message }
    }
}

impl AuthError {
    /// Redaction table from internal reason to what the client sees
    pub fn public_error(&self) -> PublicError {
        match self {
            AuthError::InvalidToken => {
                PublicError::new(StatusCode::BAD_REQUEST, "INVALID_TOKEN", INVALID_TOKEN_MESSAGE)
            }
            AuthError::UserNotFound | AuthError::IncorrectPassword => PublicError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                INVALID_CREDENTIALS_MESSAGE,
            ),
            AuthError::EmailNotVerified => PublicError::new(
                StatusCode::FORBIDDEN,
                "EMAIL_NOT_VERIFIED",
                EMAIL_NOT_VERIFIED_MESSAGE,
            ),
            AuthError::EmailAlreadyExists => PublicError::new(
                StatusCode::CONFLICT,
                "EMAIL_ALREADY_EXISTS",
                "An account with this email already exists",
            ),
            AuthError::CurrentPasswordMismatch => PublicError::new(
                StatusCode::BAD_REQUEST,
                "INCORRECT_CURRENT_PASSWORD",
                "Incorrect current password",
            ),
            AuthError::PasswordNotSet => PublicError::new(
                StatusCode::NOT_FOUND,
                "PASSWORD_NOT_SET",
                "User not found or no password set",
            ),
            AuthError::Unauthenticated => {
                PublicError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Unauthorized")
            }
            AuthError::ValidationError(_) => PublicError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Request validation failed",
            ),
            AuthError::EmailDeliveryFailed(_) => PublicError::new(
                StatusCode::BAD_GATEWAY,
                "EMAIL_DELIVERY_FAILED",
                "We could not send the email. Please try again later.",
            ),
            AuthError::DatabaseError(_)
            | AuthError::PasswordHashError
            | AuthError::TokenGenerationError(_)
            | AuthError::InternalError(_) => PublicError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred",
            ),
        }
    }

    /// Human-readable message allowed in a redirect query string
    pub fn redirect_message(&self) -> &'static str {
        match self {
            AuthError::InvalidToken => INVALID_TOKEN_MESSAGE,
            _ => DEFAULT_ERROR_MESSAGE,
        }
    }

    /// Whether the error stems from a server-side fault rather than the request
    pub fn is_internal(&self) -> bool {
        self.public_error().status.is_server_error()
    }
}
