// Session extraction for protected routes

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{
        header::{self, InvalidHeaderValue},
        request::Parts,
        HeaderMap, HeaderValue,
    },
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::Role,
    token::{Claims, SessionRejection, SessionTokenService},
};
use crate::error::ApiError;

pub const SESSION_COOKIE_NAME: &str = "session";

/// Authenticated user extractor for protected routes
///
/// Accepts `Authorization: Bearer <jwt>` first, then the session cookie.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub claims: Claims,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    SessionTokenService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let endpoint = parts.uri.path().to_string();
        let token = session_token_from_headers(&parts.headers).ok_or_else(|| {
            debug!("No session presented for {}", endpoint);
            AuthError::Unauthenticated
        })?;

        let sessions = SessionTokenService::from_ref(state);
        let claims = sessions.validate_session_token(&token).map_err(|rejection| {
            match rejection {
                SessionRejection::Expired => debug!("Expired session presented for {}", endpoint),
                SessionRejection::Invalid => warn!("Invalid session presented for {}", endpoint),
            }
            AuthError::Unauthenticated
        })?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email.clone(),
            role: claims.role,
            claims,
        })
    }
}

/// Session token from the bearer header or, failing that, the session cookie
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_token(headers))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// `Set-Cookie` value carrying a session token
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE_NAME, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// `Set-Cookie` value removing the session cookie
pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure")
    } else {
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}
