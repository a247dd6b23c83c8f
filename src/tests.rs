// Handler tests for the Auth Starter API
// Full HTTP flows against the in-memory store and outbox

use super::*;
use crate::auth::{
    error::INVALID_TOKEN_MESSAGE,
    mailer::{token_from_link, MemoryEmailSender},
    models::{NewUser, User},
    repository::{MemoryAuthStore, UserStore},
    service::RESET_REQUESTED_MESSAGE,
};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::{
    multipart::{MultipartForm, Part},
    TestResponse, TestServer,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

const SECRET: &str = "test_secret_key_for_testing_purposes";

/// Image size limit of the test app
const TEST_MAX_IMAGE_BYTES: usize = 1024;

struct TestApp {
    server: TestServer,
    store: MemoryAuthStore,
    mailer: MemoryEmailSender,
    uploads: TempDir,
}

/// Helper function to create a test app backed by in-memory collaborators
fn create_test_app() -> TestApp {
    let store = MemoryAuthStore::new();
    let mailer = MemoryEmailSender::new();
    let uploads = TempDir::new().unwrap();
    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(mailer.clone()),
        AuthConfig::new(SECRET, "http://localhost:3000"),
    )
    .with_image_store(ImageStore::new(&UploadConfig {
        dir: uploads.path().to_path_buf(),
        max_bytes: TEST_MAX_IMAGE_BYTES,
    }));

    TestApp {
        server: TestServer::new(create_router(state)).unwrap(),
        store,
        mailer,
        uploads,
    }
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .unwrap()
        .to_string()
}

fn set_cookie(response: &TestResponse) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap()
        .to_string()
}

async fn register(app: &TestApp, email: &str, password: &str) -> TestResponse {
    app.server
        .post("/api/auth/register")
        .json(&json!({ "name": "Alice", "email": email, "password": password }))
        .await
}

async fn login(app: &TestApp, email: &str, password: &str) -> TestResponse {
    app.server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": password }))
        .await
}

async fn mailed_token(app: &TestApp, email: &str) -> String {
    let message = app.mailer.last_to(email).await.expect("email sent");
    token_from_link(&message.link).expect("token in link")
}

/// Registers, verifies through the emailed link and signs in; returns the session token
async fn signed_in(app: &TestApp, email: &str, password: &str) -> String {
    register(app, email, password).await;
    let token = mailed_token(app, email).await;
    app.server
        .get("/api/auth/verify-email")
        .add_query_param("token", &token)
        .await;

    let response = login(app, email, password).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn seed_oauth_user(store: &MemoryAuthStore, email: &str) -> User {
    store
        .create_user(NewUser {
            email: email.to_string(),
            name: "Bee".to_string(),
            password_hash: None,
            image: Some("https://img.example.com/bee.png".to_string()),
            email_verified: Some(chrono::Utc::now()),
            role: auth::Role::User,
        })
        .await
        .unwrap()
}

// ============================================================================
// Registration, verification and login
// ============================================================================

/// Sign-in is refused until the verification link has been followed
#[tokio::test]
async fn test_register_verify_login_flow() {
    let app = create_test_app();

    let response = register(&app, "alice@example.com", "s3cret!").await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["emailSent"], true);

    let blocked = login(&app, "alice@example.com", "s3cret!").await;
    assert_eq!(blocked.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(blocked.json::<Value>()["error_code"], "EMAIL_NOT_VERIFIED");

    let token = mailed_token(&app, "alice@example.com").await;
    let verified = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", &token)
        .await;
    assert_eq!(verified.status_code(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&verified),
        "http://localhost:3000/auth/login?verified=true"
    );

    let response = login(&app, "alice@example.com", "s3cret!").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));

    let body: Value = response.json();
    assert!(body["token"].as_str().is_some());
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["role"], "USER");
    assert!(body["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_register_validation_error_has_details() {
    let app = create_test_app();
    let response = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "name": "A", "email": "not-an-email", "password": "123" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert!(body["details"].get("email").is_some());
    assert!(body["details"].get("password").is_some());
    assert!(app.mailer.sent().await.is_empty());
}

/// A body missing a field gets the same error shape as a failed validation
#[tokio::test]
async fn test_incomplete_body_is_validation_error() {
    let app = create_test_app();
    let response = app
        .server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": "abc", "password": "secret1" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    let message = body["details"]["body"][0]["message"].as_str().unwrap();
    assert!(message.contains("confirmPassword"));
}

#[tokio::test]
async fn test_unparseable_body_is_validation_error() {
    let app = create_test_app();
    let response = app
        .server
        .post("/api/auth/login")
        .text("{not json")
        .content_type("application/json")
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error_code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_login_accepts_padded_mixed_case_email() {
    let app = create_test_app();
    signed_in(&app, "alice@example.com", "s3cret!").await;

    let response = login(&app, "  Alice@Example.com ", "s3cret!").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["user"]["email"], "alice@example.com");
}

#[tokio::test]
async fn test_register_duplicate_email_conflict() {
    let app = create_test_app();
    register(&app, "alice@example.com", "s3cret!").await;
    let response = register(&app, "ALICE@example.com", "s3cret!").await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

/// Unknown account and wrong password produce the same response
#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = create_test_app();
    signed_in(&app, "alice@example.com", "s3cret!").await;

    let wrong_password = login(&app, "alice@example.com", "wrong-pass").await;
    let unknown_user = login(&app, "nobody@example.com", "wrong-pass").await;

    assert_eq!(wrong_password.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status_code(), StatusCode::UNAUTHORIZED);
    let a: Value = wrong_password.json();
    let b: Value = unknown_user.json();
    assert_eq!(a["error_code"], b["error_code"]);
    assert_eq!(a["message"], b["message"]);
}

#[tokio::test]
async fn test_verify_email_with_invalid_token_redirects_with_error() {
    let app = create_test_app();
    let response = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", "abc123")
        .await;

    assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
    let target = url::Url::parse(&location(&response)).unwrap();
    assert_eq!(target.path(), "/auth/login");
    let error = target
        .query_pairs()
        .find(|(k, _)| k == "error")
        .map(|(_, v)| v.into_owned());
    assert_eq!(error.as_deref(), Some(INVALID_TOKEN_MESSAGE));
}

#[tokio::test]
async fn test_verify_email_without_token_redirects_with_error() {
    let app = create_test_app();
    let response = app.server.get("/api/auth/verify-email").await;
    assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).contains("error="));
}

#[tokio::test]
async fn test_verification_link_is_single_use() {
    let app = create_test_app();
    register(&app, "alice@example.com", "s3cret!").await;
    let token = mailed_token(&app, "alice@example.com").await;

    let first = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", &token)
        .await;
    let second = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", &token)
        .await;

    assert!(location(&first).ends_with("verified=true"));
    assert!(location(&second).contains("error="));
}

#[tokio::test]
async fn test_resend_verification_invalidates_old_link() {
    let app = create_test_app();
    register(&app, "alice@example.com", "s3cret!").await;
    let old = mailed_token(&app, "alice@example.com").await;

    let response = app
        .server
        .post("/api/auth/resend-verification")
        .json(&json!({ "email": "alice@example.com" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let fresh = mailed_token(&app, "alice@example.com").await;
    assert_ne!(old, fresh);

    let stale = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", &old)
        .await;
    assert!(location(&stale).contains("error="));
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = create_test_app();
    let response = app.server.post("/api/auth/logout").await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    assert!(set_cookie(&response).contains("Max-Age=0"));
}

// ============================================================================
// Password reset
// ============================================================================

#[tokio::test]
async fn test_forgot_and_reset_password_flow() {
    let app = create_test_app();
    signed_in(&app, "alice@example.com", "s3cret!").await;

    let response = app
        .server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "alice@example.com" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let message = app.mailer.last_to("alice@example.com").await.unwrap();
    assert!(message
        .link
        .starts_with("http://localhost:3000/auth/reset-password?token="));
    let token = token_from_link(&message.link).unwrap();

    let response = app
        .server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": token, "password": "n3w-pass", "confirmPassword": "n3w-pass" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert_eq!(
        login(&app, "alice@example.com", "s3cret!").await.status_code(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        login(&app, "alice@example.com", "n3w-pass").await.status_code(),
        StatusCode::OK
    );

    let reuse = app
        .server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": token, "password": "again-pass", "confirmPassword": "again-pass" }))
        .await;
    assert_eq!(reuse.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(reuse.json::<Value>()["error_code"], "INVALID_TOKEN");
}

/// Known and unknown addresses get identical answers
#[tokio::test]
async fn test_forgot_password_does_not_reveal_accounts() {
    let app = create_test_app();
    signed_in(&app, "alice@example.com", "s3cret!").await;
    let sent_before = app.mailer.sent().await.len();

    let known = app
        .server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "alice@example.com" }))
        .await;
    let unknown = app
        .server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "ghost@example.com" }))
        .await;

    assert_eq!(known.status_code(), unknown.status_code());
    assert_eq!(known.json::<Value>(), unknown.json::<Value>());
    assert_eq!(unknown.json::<Value>()["message"], RESET_REQUESTED_MESSAGE);
    assert_eq!(app.mailer.sent().await.len(), sent_before + 1);
    assert_eq!(app.store.token_count("ghost@example.com").await, 0);
}

#[tokio::test]
async fn test_reset_password_mismatch_rejected() {
    let app = create_test_app();
    let response = app
        .server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": "abc123", "password": "n3w-pass", "confirmPassword": "other" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error_code"], "VALIDATION_ERROR");
}

// ============================================================================
// Profile and password settings
// ============================================================================

#[tokio::test]
async fn test_profile_requires_session() {
    let app = create_test_app();
    let response = app.server.get("/api/user/profile").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error_code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_get_profile() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app.server.get("/api/user/profile").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["hasPassword"], true);
}

#[tokio::test]
async fn test_get_profile_with_session_cookie() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;

    let response = app
        .server
        .get("/api/user/profile")
        .add_header(
            header::COOKIE,
            HeaderValue::from_str(&format!("session={}", token)).unwrap(),
        )
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_oauth_account_reports_no_password() {
    let app = create_test_app();
    let user = seed_oauth_user(&app.store, "bee@example.com").await;
    let attempt = login(&app, "bee@example.com", "anything").await;
    assert_eq!(attempt.status_code(), StatusCode::UNAUTHORIZED);

    let session = SessionTokenService::new(SECRET, 3600)
        .generate_session_token(&user)
        .unwrap();
    let (name, value) = bearer(&session);
    let response = app.server.get("/api/user/profile").add_header(name.clone(), value.clone()).await;
    assert_eq!(response.json::<Value>()["user"]["hasPassword"], false);

    let change = app
        .server
        .post("/api/user/password")
        .add_header(name, value)
        .json(&json!({ "currentPassword": "anything", "newPassword": "n3w-pass" }))
        .await;
    assert_eq!(change.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_profile_refreshes_session() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .patch("/api/user/profile")
        .add_header(name, value)
        .json(&json!({ "name": "Alicia" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(set_cookie(&response).starts_with("session="));

    let body: Value = response.json();
    assert_eq!(body["user"]["name"], "Alicia");
    let refreshed = body["token"].as_str().unwrap();
    let claims = SessionTokenService::new(SECRET, 3600)
        .validate_session_token(refreshed)
        .unwrap();
    assert_eq!(claims.name, "Alicia");
    assert_eq!(claims.role, auth::Role::User);
}

#[tokio::test]
async fn test_update_profile_rejects_short_name() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .patch("/api/user/profile")
        .add_header(name, value)
        .json(&json!({ "name": "A" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_change_password() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let wrong = app
        .server
        .post("/api/user/password")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "currentPassword": "nope", "newPassword": "n3w-pass" }))
        .await;
    assert_eq!(wrong.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(wrong.json::<Value>()["error_code"], "INCORRECT_CURRENT_PASSWORD");

    let ok = app
        .server
        .post("/api/user/password")
        .add_header(name, value)
        .json(&json!({ "currentPassword": "s3cret!", "newPassword": "n3w-pass" }))
        .await;
    assert_eq!(ok.status_code(), StatusCode::OK);
    assert_eq!(
        login(&app, "alice@example.com", "n3w-pass").await.status_code(),
        StatusCode::OK
    );
}

// ============================================================================
// Profile image
// ============================================================================

fn image_form(bytes: Vec<u8>, file_name: &str, mime: &str) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(bytes).file_name(file_name).mime_type(mime),
    )
}

#[tokio::test]
async fn test_upload_image_sets_profile_image() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .post("/api/user/image")
        .add_header(name.clone(), value.clone())
        .multipart(image_form(b"\x89PNG-bytes".to_vec(), "avatar.png", "image/png"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let image_url = response.json::<Value>()["imageUrl"].as_str().unwrap().to_string();
    assert!(image_url.starts_with("/uploads/"));
    assert!(image_url.ends_with(".png"));

    let stored = app.uploads.path().join(image_url.trim_start_matches("/uploads/"));
    assert_eq!(std::fs::read(stored).unwrap(), b"\x89PNG-bytes");

    let profile = app.server.get("/api/user/profile").add_header(name, value).await;
    assert_eq!(profile.json::<Value>()["user"]["image"], image_url.as_str());

    let served = app.server.get(&image_url).await;
    assert_eq!(served.status_code(), StatusCode::OK);
    assert_eq!(served.as_bytes().as_ref(), b"\x89PNG-bytes");
}

#[tokio::test]
async fn test_upload_image_requires_session() {
    let app = create_test_app();
    let response = app
        .server
        .post("/api/user/image")
        .multipart(image_form(b"png".to_vec(), "avatar.png", "image/png"))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_image_without_file_rejected() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .post("/api/user/image")
        .add_header(name, value)
        .multipart(MultipartForm::new().add_text("caption", "me"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert!(body["details"].get("file").is_some());
}

#[tokio::test]
async fn test_upload_non_image_rejected() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .post("/api/user/image")
        .add_header(name, value)
        .multipart(image_form(b"#!/bin/sh".to_vec(), "run.sh", "text/x-shellscript"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(std::fs::read_dir(app.uploads.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_upload_oversized_image_rejected() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .post("/api/user/image")
        .add_header(name, value)
        .multipart(image_form(vec![0u8; TEST_MAX_IMAGE_BYTES + 1], "big.png", "image/png"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["details"].get("file").is_some());
}

/// A session for a user no longer in storage leaves no file behind
#[tokio::test]
async fn test_upload_for_missing_user_removes_file() {
    let app = create_test_app();
    let ghost = User {
        id: uuid::Uuid::new_v4(),
        email: "ghost@example.com".to_string(),
        name: "Ghost".to_string(),
        password_hash: None,
        image: None,
        email_verified: Some(chrono::Utc::now()),
        role: auth::Role::User,
        created_at: chrono::Utc::now(),
    };
    let session = SessionTokenService::new(SECRET, 3600)
        .generate_session_token(&ghost)
        .unwrap();
    let (name, value) = bearer(&session);

    let response = app
        .server
        .post("/api/user/image")
        .add_header(name, value)
        .multipart(image_form(b"png".to_vec(), "avatar.png", "image/png"))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert!(std::fs::read_dir(app.uploads.path()).unwrap().next().is_none());
}

// ============================================================================
// Route guard, health and fallback
// ============================================================================

#[tokio::test]
async fn test_guard_redirects_anonymous_protected_request() {
    let app = create_test_app();
    let response = app.server.get("/settings").await;
    assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/auth/login?callbackUrl=%2Fsettings");
}

#[tokio::test]
async fn test_guard_redirects_signed_in_user_away_from_login() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    let response = app.server.get("/auth/login").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/settings");
}

#[tokio::test]
async fn test_guard_lets_signed_in_user_through() {
    let app = create_test_app();
    let token = signed_in(&app, "alice@example.com", "s3cret!").await;
    let (name, value) = bearer(&token);

    // Page rendering lives elsewhere, so the request falls through to 404
    let response = app.server.get("/dashboard").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let response = app.server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_unknown_route_returns_not_found() {
    let app = create_test_app();
    let response = app.server.get("/api/nope").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_openapi_document_lists_auth_routes() {
    let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
    let paths = doc["paths"].as_object().unwrap();
    assert!(paths.contains_key("/api/auth/register"));
    assert!(paths.contains_key("/api/auth/verify-email"));
    assert!(paths.contains_key("/api/user/profile"));
    assert!(paths.contains_key("/api/user/image"));
}
