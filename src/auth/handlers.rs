// HTTP handlers for authentication and account settings endpoints

use axum::{
    extract::{multipart::{MultipartError, MultipartRejection}, Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use serde::Deserialize;
use std::borrow::Cow;
use tracing::{debug, error};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::auth::{
    error::AuthError,
    middleware::{clear_session_cookie, session_cookie, AuthenticatedUser},
    models::{
        AuthResponse, ChangePasswordRequest, EmailRequest, ImageUploadResponse, LoginRequest,
        MessageResponse, ProfileResponse, ProfileUpdateResponse, ProfileView, RegisterRequest,
        RegisterResponse, ResetPasswordRequest, UpdateProfileRequest,
    },
    service::{
        PASSWORD_RESET_MESSAGE, PASSWORD_UPDATED_MESSAGE, RESET_REQUESTED_MESSAGE,
        VERIFICATION_RESENT_MESSAGE,
    },
    session::SessionToken,
};
use crate::config::AuthConfig;
use crate::error::{ApiError, ErrorResponse};
use crate::extract::ApiJson;
use crate::AppState;

/// Multipart form field carrying the image
const IMAGE_FIELD: &str = "file";

/// Multipart body of an image upload
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ImageUploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    /// Raw token from the verification email
    pub token: Option<String>,
}

fn cookie_is_secure(config: &AuthConfig) -> bool {
    config.app_url.starts_with("https://")
}

fn session_headers(config: &AuthConfig, session: &SessionToken) -> Result<HeaderMap, ApiError> {
    let cookie = session_cookie(&session.token, config.session_ttl_secs, cookie_is_secure(config))
        .map_err(|e| AuthError::InternalError(format!("session cookie: {}", e)))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, cookie);
    Ok(headers)
}

/// A missing account behind a valid session is a 404, not a credentials failure
fn profile_error(err: AuthError) -> ApiError {
    match err {
        AuthError::UserNotFound => ApiError::NotFound { resource: "User".to_string() },
        other => other.into(),
    }
}

fn file_error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ApiError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    let mut errors = ValidationErrors::new();
    errors.add(IMAGE_FIELD, error);
    errors.into()
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return file_error("too_large", "File is too large");
    }
    ApiError::MalformedBody {
        field: IMAGE_FIELD,
        reason: err.body_text(),
    }
}

/// Login page URL carrying the verification outcome
fn verification_redirect(config: &AuthConfig, outcome: Result<(), &AuthError>) -> String {
    let login = format!("{}{}", config.app_url, config.routes.login);
    match outcome {
        Ok(()) => format!("{}?verified=true", login),
        Err(err) => {
            let message: String =
                url::form_urlencoded::byte_serialize(err.redirect_message().as_bytes()).collect();
            format!("{}?error={}", login, message)
        }
    }
}

/// Register a new user
/// POST /api/auth/register
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification email issued", body = RegisterResponse),
        (status = 400, description = "Invalid input data", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    debug!("Registration attempt for {}", request.email);
    let response = state.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Login a user
/// POST /api/auth/login
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; session also set as cookie", body = AuthResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<(HeaderMap, Json<AuthResponse>), ApiError> {
    let (user, session) = state.auth.login(request).await?;
    let headers = session_headers(&state.config, &session)?;
    Ok((
        headers,
        Json(AuthResponse {
            token: session.token,
            user: user.into(),
        }),
    ))
}

/// Sign out
/// POST /api/auth/logout
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 204, description = "Session cookie cleared")),
    tag = "auth"
)]
pub async fn logout_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, clear_session_cookie(cookie_is_secure(&state.config)));
    (StatusCode::NO_CONTENT, headers)
}

/// Consume an email verification link
/// GET /api/auth/verify-email?token=
#[utoipa::path(
    get,
    path = "/api/auth/verify-email",
    params(VerifyEmailQuery),
    responses(
        (status = 307, description = "Redirect to the login page with `verified=true` or `error=<message>`")
    ),
    tag = "auth"
)]
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Redirect {
    let token = query.token.unwrap_or_default();
    let outcome = state.auth.verify_email(&token).await;

    if let Err(err) = &outcome {
        if err.is_internal() {
            error!("Email verification failed: {}", err);
        } else {
            debug!("Email verification rejected: {}", err);
        }
    }

    Redirect::temporary(&verification_redirect(
        &state.config,
        outcome.as_ref().map(|_| ()),
    ))
}

/// Send a new verification email
/// POST /api/auth/resend-verification
#[utoipa::path(
    post,
    path = "/api/auth/resend-verification",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Same answer for every address", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn resend_verification_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    request.validate()?;
    state.auth.resend_verification(&request.email).await?;
    Ok(Json(MessageResponse::new(VERIFICATION_RESENT_MESSAGE)))
}

/// Request a password reset email
/// POST /api/auth/forgot-password
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Same answer for every address", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    request.validate()?;
    state.auth.request_password_reset(&request.email).await?;
    Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)))
}

/// Set a new password with a reset token
/// POST /api/auth/reset-password
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Invalid input or invalid/expired token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.reset_password(request).await?;
    Ok(Json(MessageResponse::new(PASSWORD_RESET_MESSAGE)))
}

/// Current user's profile
/// GET /api/user/profile
#[utoipa::path(
    get,
    path = "/api/user/profile",
    responses(
        (status = 200, description = "Profile of the signed-in user", body = ProfileResponse),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    security(("session" = [])),
    tag = "user"
)]
pub async fn get_profile_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state.auth.get_profile(user.user_id).await.map_err(profile_error)?;
    Ok(Json(ProfileResponse {
        user: ProfileView::from(&profile),
    }))
}

/// Update the display name
/// PATCH /api/user/profile
#[utoipa::path(
    patch,
    path = "/api/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated; refreshed session returned and set as cookie", body = ProfileUpdateResponse),
        (status = 400, description = "Invalid input data", body = ErrorResponse),
        (status = 401, description = "No valid session", body = ErrorResponse)
    ),
    security(("session" = [])),
    tag = "user"
)]
pub async fn update_profile_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> Result<(HeaderMap, Json<ProfileUpdateResponse>), ApiError> {
    let (profile, session) = state
        .auth
        .update_profile(&user.claims, request)
        .await
        .map_err(profile_error)?;
    let headers = session_headers(&state.config, &session)?;
    Ok((
        headers,
        Json(ProfileUpdateResponse {
            user: ProfileView::from(&profile),
            token: session.token,
        }),
    ))
}

/// Change the password of the signed-in user
/// POST /api/user/password
#[utoipa::path(
    post,
    path = "/api/user/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid input or incorrect current password", body = ErrorResponse),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 404, description = "User not found or no password set", body = ErrorResponse)
    ),
    security(("session" = [])),
    tag = "user"
)]
pub async fn change_password_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.change_password(user.user_id, request).await?;
    Ok(Json(MessageResponse::new(PASSWORD_UPDATED_MESSAGE)))
}

/// Upload a new profile image
/// POST /api/user/image
#[utoipa::path(
    post,
    path = "/api/user/image",
    request_body(content = ImageUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Image stored and set on the profile", body = ImageUploadResponse),
        (status = 400, description = "No file, not an image, or too large", body = ErrorResponse),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    security(("session" = [])),
    tag = "user"
)]
pub async fn upload_image_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ImageUploadResponse>, ApiError> {
    let mut multipart = multipart?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((file_name, content_type, bytes));
        break;
    }

    let (file_name, content_type, bytes) = match upload {
        Some(upload) if !upload.2.is_empty() => upload,
        _ => return Err(file_error("required", "No file uploaded")),
    };
    if !content_type.as_deref().is_some_and(|t| t.starts_with("image/")) {
        return Err(file_error("not_an_image", "File must be an image"));
    }
    if bytes.len() > state.images.max_bytes() {
        return Err(file_error("too_large", "File is too large"));
    }

    let image_url = state
        .images
        .save(file_name.as_deref(), &bytes)
        .await
        .map_err(|e| AuthError::InternalError(format!("image write failed: {}", e)))?;

    match state.auth.update_image(user.user_id, &image_url).await {
        Ok(_) => Ok(Json(ImageUploadResponse { image_url })),
        Err(e) => {
            state.images.remove(&image_url).await;
            Err(profile_error(e))
        }
    }
}
