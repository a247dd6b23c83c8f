// Session minting, refresh and OAuth sign-in

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::auth::{
    error::AuthError,
    models::{LinkedAccount, NewUser, OAuthProfile, Role, User},
    repository::{DynAuthStore, UserStore},
    token::{Claims, SessionRejection, SessionTokenService},
};
use crate::validation::normalize_email;

/// A signed session and the claims inside it
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub claims: Claims,
}

/// Claim changes requested by the client on refresh
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub name: Option<String>,
}

/// Produces session tokens from persisted user state
#[derive(Clone)]
pub struct SessionMinter {
    store: DynAuthStore,
    tokens: SessionTokenService,
}

impl SessionMinter {
    pub fn new(store: DynAuthStore, tokens: SessionTokenService) -> Self {
        Self { store, tokens }
    }

    pub fn token_service(&self) -> &SessionTokenService {
        &self.tokens
    }

    /// Check signature and expiry of a presented session
    pub fn verify(&self, token: &str) -> Result<Claims, SessionRejection> {
        self.tokens.validate_session_token(token)
    }

    /// Mint a session for an authenticated user
    pub fn mint(&self, user: &User) -> Result<SessionToken, AuthError> {
        let claims = self.tokens.claims_for(user);
        let token = self.tokens.encode_claims(&claims)?;
        Ok(SessionToken { token, claims })
    }

    /// Sign in with a provider-verified profile
    ///
    /// Creates the user with default role when the email is new, otherwise
    /// refreshes name and image. Either way the email counts as verified and
    /// the provider account is linked to the user if it is not already.
    pub async fn oauth_sign_in(&self, profile: OAuthProfile) -> Result<(User, SessionToken), AuthError> {
        let email = normalize_email(&profile.email);
        let now = Utc::now();

        let user = match self.store.find_by_email(&email).await? {
            Some(_) => self.update_from_profile(&email, &profile, now).await?,
            None => {
                let new_user = NewUser {
                    email: email.clone(),
                    name: profile
                        .name
                        .clone()
                        .unwrap_or_else(|| default_display_name(&email)),
                    password_hash: None,
                    image: profile.image.clone(),
                    email_verified: Some(now),
                    role: Role::User,
                };
                match self.store.create_user(new_user).await {
                    Ok(user) => {
                        info!("Created user {} from {} sign-in", user.email, profile.provider);
                        user
                    }
                    // Lost a race with a concurrent first sign-in
                    Err(AuthError::EmailAlreadyExists) => {
                        self.update_from_profile(&email, &profile, now).await?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.link_provider_account(&user, &profile).await;

        let session = self.mint(&user)?;
        Ok((user, session))
    }

    /// A failed link is logged and does not block the sign-in
    async fn link_provider_account(&self, user: &User, profile: &OAuthProfile) {
        let account = LinkedAccount {
            user_id: user.id,
            provider: profile.provider.clone(),
            provider_account_id: profile.provider_account_id.clone(),
        };

        match self.store.link_account(&account).await {
            Ok(owner) if owner == user.id => {
                debug!("{} account {} linked to {}", account.provider, account.provider_account_id, user.email)
            }
            Ok(owner) => warn!(
                "{} account {} belongs to user {}, not {}",
                account.provider, account.provider_account_id, owner, user.id
            ),
            Err(e) => error!(
                "Failed to link {} account for {}: {}",
                account.provider, user.email, e
            ),
        }
    }

    async fn update_from_profile(
        &self,
        email: &str,
        profile: &OAuthProfile,
        now: chrono::DateTime<Utc>,
    ) -> Result<User, AuthError> {
        self.store
            .update_oauth_profile(email, profile, now)
            .await?
            .ok_or_else(|| AuthError::InternalError(format!("user {} vanished during sign-in", email)))
    }

    /// Re-mint a session after a profile change, without re-authentication
    ///
    /// Role always comes from storage. A user missing from storage does not
    /// fail the refresh; the role falls back to `USER`.
    pub async fn refresh(&self, claims: &Claims, update: SessionUpdate) -> Result<SessionToken, AuthError> {
        let now = Utc::now().timestamp();
        let refreshed = match self.store.find_by_id(claims.sub).await? {
            Some(user) => Claims {
                sub: user.id,
                email: user.email,
                name: update.name.unwrap_or(user.name),
                role: user.role,
                iat: now,
                exp: now + self.tokens.session_duration(),
            },
            None => {
                error!("User with id {} not found while refreshing session", claims.sub);
                Claims {
                    sub: claims.sub,
                    email: claims.email.clone(),
                    name: update.name.unwrap_or_else(|| claims.name.clone()),
                    role: Role::User,
                    iat: now,
                    exp: now + self.tokens.session_duration(),
                }
            }
        };

        if refreshed.role != claims.role {
            warn!(
                "Role for {} changed from {} to {} on refresh",
                refreshed.sub, claims.role, refreshed.role
            );
        }

        let token = self.tokens.encode_claims(&refreshed)?;
        Ok(SessionToken { token, claims: refreshed })
    }
}

fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}
