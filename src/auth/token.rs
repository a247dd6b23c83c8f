// Session JWT generation and validation service

use crate::auth::{error::AuthError, models::{Role, User}};
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,       // user id
    pub email: String,
    pub name: String,
    pub role: Role,
    pub exp: i64,        // expiration timestamp
    pub iat: i64,        // issued at timestamp
}

/// Why a session token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    Expired,
    Invalid,
}

/// Token service for session JWT operations
///
/// Validation only checks signature and expiry; it never touches storage.
#[derive(Clone)]
pub struct SessionTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_duration: i64, // in seconds
}

impl SessionTokenService {
    /// Create a new SessionTokenService with secret key and session lifetime
    pub fn new(secret: &str, session_duration: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            session_duration,
        }
    }

    pub fn session_duration(&self) -> i64 {
        self.session_duration
    }

    /// Build claims for a user as currently persisted
    pub fn claims_for(&self, user: &User) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            iat: now,
            exp: now + self.session_duration,
        }
    }

    /// Sign a set of claims
    pub fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenGenerationError(e.to_string()))
    }

    /// Generate a session token for a user
    pub fn generate_session_token(&self, user: &User) -> Result<String, AuthError> {
        self.encode_claims(&self.claims_for(user))
    }

    /// Validate a session token
    pub fn validate_session_token(&self, token: &str) -> Result<Claims, SessionRejection> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionRejection::Expired,
                _ => SessionRejection::Invalid,
            })
    }
}
