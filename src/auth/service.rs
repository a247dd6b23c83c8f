// Authentication service - business logic layer

use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::auth::{
    credentials::CredentialVerifier,
    error::AuthError,
    mailer::EmailSender,
    models::{
        ChangePasswordRequest, LoginRequest, NewUser, OAuthProfile, RegisterRequest,
        RegisterResponse, ResetPasswordRequest, Role, TokenEffect, TokenPurpose,
        UpdateProfileRequest, User,
    },
    password::PasswordService,
    repository::{DynAuthStore, UserStore},
    session::{SessionMinter, SessionToken, SessionUpdate},
    token::{Claims, SessionTokenService},
    verification::VerificationTokenService,
};
use crate::config::AuthConfig;
use crate::validation::normalize_email;

pub const REGISTERED_MESSAGE: &str =
    "Registration successful. Please check your email to verify your account.";
pub const REGISTERED_EMAIL_FAILED_MESSAGE: &str =
    "Registration successful, but we could not send the verification email. Please request a new one.";
/// Same body whether or not the account exists
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for this email, a password reset link has been sent.";
pub const VERIFICATION_RESENT_MESSAGE: &str =
    "If this email needs verification, a new link has been sent.";
pub const PASSWORD_RESET_MESSAGE: &str = "Password has been reset successfully";
pub const PASSWORD_UPDATED_MESSAGE: &str = "Password updated successfully";

/// Authentication service coordinating all auth operations
#[derive(Clone)]
pub struct AuthService {
    store: DynAuthStore,
    credentials: CredentialVerifier,
    tokens: VerificationTokenService,
    sessions: SessionMinter,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(store: DynAuthStore, mailer: Arc<dyn EmailSender>, config: Arc<AuthConfig>) -> Self {
        let session_tokens = SessionTokenService::new(&config.jwt_secret, config.session_ttl_secs);
        Self {
            credentials: CredentialVerifier::new(store.clone()),
            tokens: VerificationTokenService::new(store.clone(), mailer, config),
            sessions: SessionMinter::new(store.clone(), session_tokens),
            store,
        }
    }

    pub fn session_tokens(&self) -> &SessionTokenService {
        self.sessions.token_service()
    }

    pub fn verification_tokens(&self) -> &VerificationTokenService {
        &self.tokens
    }

    /// Register a new credentials account and send its verification link
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.password)?;

        let email = normalize_email(&request.email);
        let password_hash = PasswordService::hash_password(&request.password)?;

        let user = self
            .store
            .create_user(NewUser {
                email,
                name: request.name.trim().to_string(),
                password_hash: Some(password_hash),
                image: None,
                email_verified: None,
                role: Role::User,
            })
            .await?;
        info!("Registered user {}", user.email);

        let issued = self.tokens.issue(&user.email, TokenPurpose::VerifyEmail).await?;
        let message = if issued.email_sent {
            REGISTERED_MESSAGE
        } else {
            REGISTERED_EMAIL_FAILED_MESSAGE
        };

        Ok(RegisterResponse {
            message: message.to_string(),
            email_sent: issued.email_sent,
        })
    }

    /// Authenticate with email and password
    pub async fn login(&self, request: LoginRequest) -> Result<(User, SessionToken), AuthError> {
        request.validate()?;
        let user = self.credentials.verify(&request.email, &request.password).await?;
        let session = self.sessions.mint(&user)?;
        info!("User {} signed in", user.email);
        Ok((user, session))
    }

    /// Sign in with a profile from a completed OAuth handshake
    pub async fn oauth_sign_in(&self, profile: OAuthProfile) -> Result<(User, SessionToken), AuthError> {
        self.sessions.oauth_sign_in(profile).await
    }

    /// Consume an email verification token
    pub async fn verify_email(&self, raw_token: &str) -> Result<User, AuthError> {
        if raw_token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        let user = self.tokens.consume(raw_token, TokenEffect::MarkEmailVerified).await?;
        info!("Email verified for {}", user.email);
        Ok(user)
    }

    /// Send a fresh verification link
    ///
    /// Unknown and already verified addresses get the same answer and no mail.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        match self.store.find_by_email(&email).await? {
            Some(user) if !user.is_verified() => {
                self.tokens.issue(&user.email, TokenPurpose::VerifyEmail).await?;
            }
            Some(_) => debug!("Verification resend skipped for verified {}", email),
            None => debug!("Verification resend requested for unknown {}", email),
        }
        Ok(())
    }

    /// Start a password reset
    ///
    /// Unknown addresses short-circuit before a token is created.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        match self.store.find_by_email(&email).await? {
            Some(user) => {
                self.tokens.issue(&user.email, TokenPurpose::ResetPassword).await?;
            }
            None => debug!("Password reset requested for unknown {}", email),
        }
        Ok(())
    }

    /// Complete a password reset with a token from the reset email
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<User, AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.password)?;

        let password_hash = PasswordService::hash_password(&request.password)?;
        let user = self
            .tokens
            .consume(&request.token, TokenEffect::SetPasswordHash(password_hash))
            .await?;
        info!("Password reset for {}", user.email);
        Ok(user)
    }

    pub async fn get_profile(&self, user_id: uuid::Uuid) -> Result<User, AuthError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Rename the user and re-mint their session with the new name
    pub async fn update_profile(
        &self,
        claims: &Claims,
        request: UpdateProfileRequest,
    ) -> Result<(User, SessionToken), AuthError> {
        request.validate()?;
        let name = request.name.trim().to_string();

        let user = self
            .store
            .update_name(claims.sub, &name)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let session = self
            .sessions
            .refresh(claims, SessionUpdate { name: Some(user.name.clone()) })
            .await?;
        Ok((user, session))
    }

    /// Point the user's profile image at a stored upload
    pub async fn update_image(&self, user_id: uuid::Uuid, image_url: &str) -> Result<User, AuthError> {
        let user = self
            .store
            .update_image(user_id, image_url)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!("Profile image updated for {}", user.email);
        Ok(user)
    }

    /// Change the password of a signed-in user
    pub async fn change_password(
        &self,
        user_id: uuid::Uuid,
        request: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.new_password)?;

        let user = self.store.find_by_id(user_id).await?;
        let current_hash = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(hash) => hash,
            None => return Err(AuthError::PasswordNotSet),
        };

        if !PasswordService::verify_password(&request.current_password, current_hash)? {
            warn!("Password change rejected for {}: wrong current password", user_id);
            return Err(AuthError::CurrentPasswordMismatch);
        }

        let new_hash = PasswordService::hash_password(&request.new_password)?;
        if !self.store.update_password_hash(user_id, &new_hash).await? {
            return Err(AuthError::PasswordNotSet);
        }
        info!("Password changed for {}", user_id);
        Ok(())
    }

    /// Delete expired verification and reset tokens
    pub async fn purge_expired_tokens(&self) -> Result<u64, AuthError> {
        self.tokens.purge_expired().await
    }
}
