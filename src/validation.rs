// Validation utilities module
// Provides custom validation functions for request DTOs and passwords

use serde::{Deserialize, Deserializer};
use validator::ValidationError;

use crate::auth::models::ResetPasswordRequest;

/// Minimum password length accepted anywhere a password is set
pub const PASSWORD_MIN_LENGTH: usize = 6;

/// Maximum password length; bounds the work done by the hasher
pub const PASSWORD_MAX_LENGTH: usize = 128;

/// Validates that both password fields of a reset request agree
pub fn validate_reset_passwords_match(request: &ResetPasswordRequest) -> Result<(), ValidationError> {
    if request.password == request.confirm_password {
        Ok(())
    } else {
        let mut error = ValidationError::new("passwords_do_not_match");
        error.message = Some("Passwords do not match".into());
        Err(error)
    }
}

/// Validates password length bounds
pub fn validate_password_length(password: &str) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if length < PASSWORD_MIN_LENGTH {
        Err(ValidationError::new("password_too_short"))
    } else if length > PASSWORD_MAX_LENGTH {
        Err(ValidationError::new("password_too_long"))
    } else {
        Ok(())
    }
}

/// Normalizes an email address for lookup and storage
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Deserializes an email field in normalized form; validators run on the result
pub fn deserialize_email<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_email(&raw))
}
