// Email + password verification

use tracing::{debug, warn};

use crate::auth::{
    error::AuthError,
    models::User,
    password::PasswordService,
    repository::{DynAuthStore, UserStore},
};
use crate::validation::normalize_email;

/// Checks email/password pairs against stored hashes
#[derive(Clone)]
pub struct CredentialVerifier {
    store: DynAuthStore,
}

impl CredentialVerifier {
    pub fn new(store: DynAuthStore) -> Self {
        Self { store }
    }

    /// Return the user owning these credentials
    ///
    /// The verified-email gate is checked only once the password matched, so
    /// a guesser never learns the verification state of an account.
    pub async fn verify(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);

        let user = match self.store.find_by_email(&email).await? {
            Some(user) if user.password_hash.is_some() => user,
            _ => {
                warn!("Login attempt failed for {}: user not found or no password set", email);
                return Err(AuthError::UserNotFound);
            }
        };

        let hash = user.password_hash.as_deref().unwrap_or_default();
        if !PasswordService::verify_password(password, hash)? {
            warn!("Login attempt failed for {}: incorrect password", email);
            return Err(AuthError::IncorrectPassword);
        }

        if !user.is_verified() {
            debug!("Login blocked for {}: email not verified", email);
            return Err(AuthError::EmailNotVerified);
        }

        Ok(user)
    }
}
