// Per-request route protection
//
// Session validity here means signature and expiry only. The guard never
// reaches the datastore.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::auth::{middleware::session_token_from_headers, token::SessionTokenService};
use crate::config::RoutePaths;

/// How the guard sees a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    AuthCallback,
    Protected,
    AuthPage,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Anonymous request to a protected path
    RedirectToLogin { location: String },
    /// Signed-in request to the login or register page
    RedirectToDefault { location: String },
}

#[derive(Clone)]
pub struct RouteGuard {
    routes: Arc<RoutePaths>,
    sessions: SessionTokenService,
}

impl RouteGuard {
    pub fn new(routes: RoutePaths, sessions: SessionTokenService) -> Self {
        Self {
            routes: Arc::new(routes),
            sessions,
        }
    }

    pub fn classify(&self, path: &str) -> RouteClass {
        let routes = &self.routes;
        if path.starts_with(&routes.auth_callback_prefix) {
            RouteClass::AuthCallback
        } else if routes
            .protected_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            RouteClass::Protected
        } else if path == routes.login || path == routes.register {
            RouteClass::AuthPage
        } else {
            RouteClass::Other
        }
    }

    pub fn decide(&self, path: &str, query: Option<&str>, authenticated: bool) -> GuardDecision {
        match self.classify(path) {
            RouteClass::Protected if !authenticated => {
                let original = match query {
                    Some(q) if !q.is_empty() => format!("{}?{}", path, q),
                    _ => path.to_string(),
                };
                let callback: String = url::form_urlencoded::byte_serialize(original.as_bytes()).collect();
                GuardDecision::RedirectToLogin {
                    location: format!("{}?callbackUrl={}", self.routes.login, callback),
                }
            }
            RouteClass::AuthPage if authenticated => GuardDecision::RedirectToDefault {
                location: self.routes.default_login_redirect.clone(),
            },
            _ => GuardDecision::Allow,
        }
    }

    /// Whether the presented session token is currently valid
    pub fn is_authenticated(&self, token: Option<&str>) -> bool {
        token.is_some_and(|t| self.sessions.validate_session_token(t).is_ok())
    }
}

/// Middleware applying `RouteGuard` decisions
pub async fn route_guard(State(guard): State<RouteGuard>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let authenticated = guard.is_authenticated(session_token_from_headers(request.headers()).as_deref());

    match guard.decide(&path, query.as_deref(), authenticated) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::RedirectToLogin { location } => {
            debug!("Redirecting anonymous request for {} to login", path);
            Redirect::temporary(&location).into_response()
        }
        GuardDecision::RedirectToDefault { location } => {
            debug!("Redirecting signed-in request for {} to {}", path, location);
            Redirect::temporary(&location).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{Role, User};
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn guard() -> RouteGuard {
        RouteGuard::new(
            RoutePaths::default(),
            SessionTokenService::new("test_secret_key_for_testing_purposes", 3600),
        )
    }

    #[test]
    fn test_classification() {
        let guard = guard();
        assert_eq!(guard.classify("/api/auth/verify-email"), RouteClass::AuthCallback);
        assert_eq!(guard.classify("/settings"), RouteClass::Protected);
        assert_eq!(guard.classify("/dashboard/stats"), RouteClass::Protected);
        assert_eq!(guard.classify("/documentation"), RouteClass::Protected);
        assert_eq!(guard.classify("/auth/login"), RouteClass::AuthPage);
        assert_eq!(guard.classify("/auth/register"), RouteClass::AuthPage);
        assert_eq!(guard.classify("/auth/reset-password"), RouteClass::Other);
        assert_eq!(guard.classify("/"), RouteClass::Other);
    }

    #[test]
    fn test_prefix_match_is_plain_string_prefix() {
        assert_eq!(guard().classify("/settingsfoo"), RouteClass::Protected);
    }

    #[test]
    fn test_anonymous_protected_request_redirects_to_login() {
        let decision = guard().decide("/settings", None, false);
        assert_eq!(
            decision,
            GuardDecision::RedirectToLogin {
                location: "/auth/login?callbackUrl=%2Fsettings".to_string()
            }
        );
    }

    #[test]
    fn test_callback_url_keeps_query() {
        let decision = guard().decide("/dashboard", Some("tab=usage&range=7d"), false);
        assert_eq!(
            decision,
            GuardDecision::RedirectToLogin {
                location: "/auth/login?callbackUrl=%2Fdashboard%3Ftab%3Dusage%26range%3D7d".to_string()
            }
        );
    }

    #[test]
    fn test_signed_in_auth_page_redirects_to_settings() {
        assert_eq!(
            guard().decide("/auth/login", None, true),
            GuardDecision::RedirectToDefault { location: "/settings".to_string() }
        );
        assert_eq!(guard().decide("/auth/login", None, false), GuardDecision::Allow);
    }

    #[test]
    fn test_callbacks_always_pass() {
        assert_eq!(guard().decide("/api/auth/login", None, false), GuardDecision::Allow);
        assert_eq!(guard().decide("/api/auth/login", None, true), GuardDecision::Allow);
    }

    #[test]
    fn test_authentication_needs_valid_signature() {
        let guard = guard();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            password_hash: None,
            image: None,
            email_verified: Some(Utc::now()),
            role: Role::User,
            created_at: Utc::now(),
        };
        let token = guard.sessions.generate_session_token(&user).unwrap();

        assert!(guard.is_authenticated(Some(&token)));
        assert!(!guard.is_authenticated(Some("forged.token.value")));
        assert!(!guard.is_authenticated(None));
    }

    #[tokio::test]
    async fn test_layer_redirects_before_reaching_handler() {
        use axum::{body::Body, http::{header, Request as HttpRequest, StatusCode}, routing::get, Router};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/settings", get(|| async { "settings" }))
            .layer(axum::middleware::from_fn_with_state(guard(), route_guard));

        let response = app
            .oneshot(HttpRequest::builder().uri("/settings?tab=profile").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/auth/login?callbackUrl=%2Fsettings%3Ftab%3Dprofile"
        );
    }

    proptest! {
        #[test]
        fn prop_protected_paths_never_pass_anonymously(suffix in "[a-z0-9/]{0,20}") {
            let path = format!("/settings{}", suffix);
            let decision = guard().decide(&path, None, false);
            let is_login_redirect = matches!(decision, GuardDecision::RedirectToLogin { .. });
            prop_assert!(is_login_redirect);
        }

        #[test]
        fn prop_other_paths_always_pass(path in "/(about|pricing|blog)[a-z0-9/]{0,20}", authed in any::<bool>()) {
            prop_assert_eq!(guard().decide(&path, None, authed), GuardDecision::Allow);
        }
    }
}
