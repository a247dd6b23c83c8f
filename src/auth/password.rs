// Password hashing and validation service

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use validator::{ValidationErrors, ValidationError};

use crate::auth::error::AuthError;
use crate::validation::validate_password_length;

/// Password service for hashing and verification
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordService;

impl PasswordService {
    /// Hash a password using Argon2id with a random salt
    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                tracing::error!("Argon2 hashing failed: {}", e);
                AuthError::PasswordHashError
            })
    }

    /// Verify a password against a PHC-formatted hash
    ///
    /// Returns `Ok(false)` on mismatch; a malformed stored hash is an error.
    pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            tracing::error!("Stored password hash is malformed: {}", e);
            AuthError::PasswordHashError
        })?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => {
                tracing::error!("Argon2 verification failed: {}", e);
                Err(AuthError::PasswordHashError)
            }
        }
    }

    /// Validate password strength requirements
    pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
        validate_password_length(password).map_err(|error| {
            let mut errors = ValidationErrors::new();
            errors.add("password", with_message(error));
            AuthError::ValidationError(errors)
        })
    }
}

fn with_message(mut error: ValidationError) -> ValidationError {
    if error.message.is_none() {
        error.message = Some(
            match error.code.as_ref() {
                "password_too_long" => "Password is too long",
                _ => "Password must be at least 6 characters",
            }
            .into(),
        );
    }
    error
}
