// Single-use verification tokens: issuance and consumption
//
// Raw tokens only ever exist in the outgoing email and the incoming request.
// Storage holds their SHA-256 digest.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::{
    error::AuthError,
    mailer::{EmailMessage, EmailSender},
    models::{Redemption, TokenEffect, TokenPurpose, User, VerificationToken},
    repository::{DynAuthStore, TokenStore},
};
use crate::config::AuthConfig;

/// Raw token entropy in bytes
const TOKEN_BYTES: usize = 32;

/// Path of the endpoint consuming verification links
pub const VERIFY_EMAIL_PATH: &str = "/api/auth/verify-email";

/// Result of issuing a token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub expires: DateTime<Utc>,
    /// False when delivery failed and the strict mode is off
    pub email_sent: bool,
}

/// Generate a hex-encoded token from the thread-local CSPRNG
pub fn generate_raw_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Shortened form of a token safe to put in logs
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

/// Issues and consumes verification and password-reset tokens
#[derive(Clone)]
pub struct VerificationTokenService {
    store: DynAuthStore,
    mailer: Arc<dyn EmailSender>,
    config: Arc<AuthConfig>,
}

impl VerificationTokenService {
    pub fn new(store: DynAuthStore, mailer: Arc<dyn EmailSender>, config: Arc<AuthConfig>) -> Self {
        Self { store, mailer, config }
    }

    fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::VerifyEmail => Duration::seconds(self.config.verification_token_ttl_secs),
            TokenPurpose::ResetPassword => Duration::seconds(self.config.reset_token_ttl_secs),
        }
    }

    /// Link delivered to the user for a token
    pub fn link_for(&self, purpose: TokenPurpose, raw: &str) -> Result<String, AuthError> {
        let path = match purpose {
            TokenPurpose::VerifyEmail => VERIFY_EMAIL_PATH,
            TokenPurpose::ResetPassword => self.config.routes.reset_password.as_str(),
        };
        let mut link = url::Url::parse(&format!("{}{}", self.config.app_url, path))
            .map_err(|e| AuthError::InternalError(format!("invalid app url: {}", e)))?;
        link.query_pairs_mut().append_pair("token", raw);
        Ok(link.into())
    }

    /// Issue a token for `identifier` and email it
    pub async fn issue(&self, identifier: &str, purpose: TokenPurpose) -> Result<IssuedToken, AuthError> {
        self.issue_at(identifier, purpose, Utc::now()).await
    }

    /// Issue a token as of `now`
    ///
    /// Any earlier token for the same identifier and purpose stops working.
    pub async fn issue_at(
        &self,
        identifier: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let raw = generate_raw_token();
        let expires = now + self.ttl(purpose);

        self.store
            .replace_token(VerificationToken {
                token_hash: hash_token(&raw),
                identifier: identifier.to_string(),
                purpose,
                expires,
            })
            .await?;

        info!(
            "Issued {} token {} for {} (expires {})",
            purpose,
            redact_token(&raw),
            identifier,
            expires.to_rfc3339()
        );

        let message = EmailMessage {
            to: identifier.to_string(),
            purpose,
            link: self.link_for(purpose, &raw)?,
        };

        let email_sent = match self.mailer.send(message).await {
            Ok(()) => true,
            Err(e) if self.config.strict_email_delivery => {
                error!("Failed to deliver {} email to {}: {}", purpose, identifier, e);
                return Err(AuthError::EmailDeliveryFailed(e.to_string()));
            }
            Err(e) => {
                warn!("Token issued but {} email to {} not sent: {}", purpose, identifier, e);
                false
            }
        };

        Ok(IssuedToken { raw, expires, email_sent })
    }

    /// Consume a raw token and apply its effect
    pub async fn consume(&self, raw: &str, effect: TokenEffect) -> Result<User, AuthError> {
        self.consume_at(raw, effect, Utc::now()).await
    }

    /// Consume a raw token as of `now`
    ///
    /// Unknown, expired and already used tokens all fail with `InvalidToken`.
    pub async fn consume_at(
        &self,
        raw: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let purpose = effect.purpose();
        let redacted = redact_token(raw);

        match self.store.redeem_token(&hash_token(raw), effect, now).await? {
            Redemption::Unknown => {
                warn!("Unknown {} token presented: {}", purpose, redacted);
                Err(AuthError::InvalidToken)
            }
            Redemption::Expired { identifier } => {
                warn!("Expired {} token presented for {}: {}", purpose, identifier, redacted);
                Err(AuthError::InvalidToken)
            }
            Redemption::OrphanedUser { identifier } => {
                error!(
                    "{} token {} found, but user {} does not exist",
                    purpose, redacted, identifier
                );
                Err(AuthError::InternalError(format!(
                    "token identifier {} has no user",
                    identifier
                )))
            }
            Redemption::Applied(user) => {
                info!("{} token {} consumed for {}", purpose, redacted, user.email);
                Ok(user)
            }
        }
    }

    /// Remove every expired token
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.store.delete_expired_tokens(Utc::now()).await
    }
}
