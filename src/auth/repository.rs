// Persistence for users and verification tokens
//
// The traits are the seam between the auth flows and the datastore. The
// PostgreSQL implementation is used in production; the in-memory one backs
// local development without a database and the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{
        LinkedAccount, NewUser, OAuthProfile, Redemption, TokenEffect, TokenPurpose, User,
        UserRow, VerificationToken,
    },
};

const USER_COLUMNS: &str =
    "id, email, name, password_hash, image, email_verified, role, created_at";

/// User persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by normalized email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    /// Insert a user; a taken email yields `EmailAlreadyExists`
    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError>;

    /// Refresh name/image from a provider profile and mark the email verified
    async fn update_oauth_profile(
        &self,
        email: &str,
        profile: &OAuthProfile,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError>;

    async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>, AuthError>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, AuthError>;

    async fn update_image(&self, id: Uuid, image: &str) -> Result<Option<User>, AuthError>;

    /// Link a provider account unless it is already linked
    ///
    /// Returns the id of the user owning the provider account afterwards,
    /// which differs from `account.user_id` when someone else holds it.
    async fn link_account(&self, account: &LinkedAccount) -> Result<Uuid, AuthError>;
}

/// Verification token persistence
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store a token, replacing any other token for its identifier and purpose
    ///
    /// Concurrent calls for one identifier and purpose leave exactly one row.
    async fn replace_token(&self, token: VerificationToken) -> Result<(), AuthError>;

    /// Claim a token and apply its effect as one unit
    ///
    /// The claim is a single-winner delete; a concurrent second caller sees
    /// `Redemption::Unknown`. If applying the effect fails the claim is undone.
    async fn redeem_token(
        &self,
        token_hash: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<Redemption, AuthError>;

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Everything the auth flows need from storage
pub trait AuthStore: UserStore + TokenStore {}

impl<T: UserStore + TokenStore> AuthStore for T {}

pub type DynAuthStore = Arc<dyn AuthStore>;

// ============================================================================
// PostgreSQL
// ============================================================================

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedToken {
    identifier: String,
    expires: DateTime<Utc>,
}

#[async_trait]
impl UserStore for PgAuthStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, image, email_verified, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(&new_user.password_hash)
        .bind(&new_user.image)
        .bind(new_user.email_verified)
        .bind(new_user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // Check for unique constraint violation
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return AuthError::EmailAlreadyExists;
                }
            }
            AuthError::from(e)
        })?;

        Ok(row.into())
    }

    async fn update_oauth_profile(
        &self,
        email: &str,
        profile: &OAuthProfile,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                image = COALESCE($3, image),
                email_verified = COALESCE(email_verified, $4)
            WHERE LOWER(email) = LOWER($1)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(email)
        .bind(&profile.name)
        .bind(&profile.image)
        .bind(verified_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET name = $2 WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_image(&self, id: Uuid, image: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET image = $2 WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(image)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn link_account(&self, account: &LinkedAccount) -> Result<Uuid, AuthError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, provider, provider_account_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, provider_account_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account.user_id)
        .bind(&account.provider)
        .bind(&account.provider_account_id)
        .execute(&self.pool)
        .await?;

        let owner: (Uuid,) = sqlx::query_as(
            "SELECT user_id FROM accounts WHERE provider = $1 AND provider_account_id = $2",
        )
        .bind(&account.provider)
        .bind(&account.provider_account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(owner.0)
    }
}

#[async_trait]
impl TokenStore for PgAuthStore {
    async fn replace_token(&self, token: VerificationToken) -> Result<(), AuthError> {
        // The (identifier, purpose) key serializes concurrent issuance
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (token, identifier, purpose, expires)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identifier, purpose)
            DO UPDATE SET token = EXCLUDED.token, expires = EXCLUDED.expires
            "#,
        )
        .bind(&token.token_hash)
        .bind(&token.identifier)
        .bind(token.purpose.as_str())
        .bind(token.expires)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn redeem_token(
        &self,
        token_hash: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<Redemption, AuthError> {
        // Dropping `tx` without commit rolls the claim back
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, ClaimedToken>(
            "DELETE FROM verification_tokens WHERE token = $1 AND purpose = $2 RETURNING identifier, expires",
        )
        .bind(token_hash)
        .bind(effect.purpose().as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(claimed) = claimed else {
            return Ok(Redemption::Unknown);
        };

        if now >= claimed.expires {
            tx.commit().await?;
            return Ok(Redemption::Expired { identifier: claimed.identifier });
        }

        let row = match effect {
            TokenEffect::MarkEmailVerified => {
                sqlx::query_as::<_, UserRow>(&format!(
                    "UPDATE users SET email_verified = $2 WHERE LOWER(email) = LOWER($1) RETURNING {}",
                    USER_COLUMNS
                ))
                .bind(&claimed.identifier)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?
            }
            TokenEffect::SetPasswordHash(hash) => {
                sqlx::query_as::<_, UserRow>(&format!(
                    "UPDATE users SET password_hash = $2 WHERE LOWER(email) = LOWER($1) RETURNING {}",
                    USER_COLUMNS
                ))
                .bind(&claimed.identifier)
                .bind(hash)
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;

        Ok(match row {
            Some(row) => Redemption::Applied(row.into()),
            None => Redemption::OrphanedUser { identifier: claimed.identifier },
        })
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE expires <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    tokens: HashMap<String, VerificationToken>,
    /// Keyed by (provider, provider account id)
    accounts: HashMap<(String, String), Uuid>,
}

impl MemoryState {
    fn user_id_by_email(&self, email: &str) -> Option<Uuid> {
        let email = email.to_lowercase();
        self.users
            .values()
            .find(|user| user.email.to_lowercase() == email)
            .map(|user| user.id)
    }
}

/// In-memory store; every operation runs under one lock
#[derive(Clone, Default)]
pub struct MemoryAuthStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens for an identifier, any purpose
    #[cfg(test)]
    pub async fn token_count(&self, identifier: &str) -> usize {
        let state = self.state.lock().await;
        state
            .tokens
            .values()
            .filter(|token| token.identifier == identifier)
            .count()
    }

    /// Look up a stored token by its digest
    #[cfg(test)]
    pub async fn find_token(&self, token_hash: &str) -> Option<VerificationToken> {
        self.state.lock().await.tokens.get(token_hash).cloned()
    }

    /// Provider accounts linked to a user
    #[cfg(test)]
    pub async fn accounts_of(&self, user_id: Uuid) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        let mut accounts: Vec<_> = state
            .accounts
            .iter()
            .filter(|(_, owner)| **owner == user_id)
            .map(|(key, _)| key.clone())
            .collect();
        accounts.sort();
        accounts
    }
}

#[async_trait]
impl UserStore for MemoryAuthStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let state = self.state.lock().await;
        Ok(state
            .user_id_by_email(email)
            .and_then(|id| state.users.get(&id).cloned()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        let mut state = self.state.lock().await;
        if state.user_id_by_email(&new_user.email).is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            password_hash: new_user.password_hash,
            image: new_user.image,
            email_verified: new_user.email_verified,
            role: new_user.role,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_oauth_profile(
        &self,
        email: &str,
        profile: &OAuthProfile,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let mut state = self.state.lock().await;
        let Some(id) = state.user_id_by_email(email) else {
            return Ok(None);
        };
        let user = state.users.get_mut(&id).map(|user| {
            if let Some(name) = &profile.name {
                user.name = name.clone();
            }
            if let Some(image) = &profile.image {
                user.image = Some(image.clone());
            }
            user.email_verified.get_or_insert(verified_at);
            user.clone()
        });
        Ok(user)
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>, AuthError> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.name = name.to_string();
            user.clone()
        }))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, AuthError> {
        let mut state = self.state.lock().await;
        Ok(match state.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = Some(password_hash.to_string());
                true
            }
            None => false,
        })
    }

    async fn update_image(&self, id: Uuid, image: &str) -> Result<Option<User>, AuthError> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.image = Some(image.to_string());
            user.clone()
        }))
    }

    async fn link_account(&self, account: &LinkedAccount) -> Result<Uuid, AuthError> {
        let mut state = self.state.lock().await;
        let key = (account.provider.clone(), account.provider_account_id.clone());
        Ok(*state.accounts.entry(key).or_insert(account.user_id))
    }
}

#[async_trait]
impl TokenStore for MemoryAuthStore {
    async fn replace_token(&self, token: VerificationToken) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        state
            .tokens
            .retain(|_, t| !(t.identifier == token.identifier && t.purpose == token.purpose));
        state.tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn redeem_token(
        &self,
        token_hash: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<Redemption, AuthError> {
        let mut state = self.state.lock().await;

        let purpose: TokenPurpose = effect.purpose();
        match state.tokens.get(token_hash) {
            Some(token) if token.purpose == purpose => {}
            _ => return Ok(Redemption::Unknown),
        }
        let Some(claimed) = state.tokens.remove(token_hash) else {
            return Ok(Redemption::Unknown);
        };

        if claimed.is_expired(now) {
            return Ok(Redemption::Expired { identifier: claimed.identifier });
        }

        let Some(id) = state.user_id_by_email(&claimed.identifier) else {
            return Ok(Redemption::OrphanedUser { identifier: claimed.identifier });
        };

        let user = state.users.get_mut(&id).map(|user| {
            match effect {
                TokenEffect::MarkEmailVerified => user.email_verified = Some(now),
                TokenEffect::SetPasswordHash(hash) => user.password_hash = Some(hash),
            }
            user.clone()
        });

        Ok(match user {
            Some(user) => Redemption::Applied(user),
            None => Redemption::OrphanedUser { identifier: claimed.identifier },
        })
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, token| !token.is_expired(now));
        Ok((before - state.tokens.len()) as u64)
    }
}
