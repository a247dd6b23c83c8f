pub mod auth;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod uploads;
pub mod validation;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    http::Uri,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use utoipa::{Modify, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use auth::{
    handlers,
    models::{
        AuthResponse, ChangePasswordRequest, EmailRequest, ImageUploadResponse, LoginRequest,
        MessageResponse, ProfileResponse, ProfileUpdateResponse, ProfileView, RegisterRequest,
        RegisterResponse, ResetPasswordRequest, Role, UpdateProfileRequest, UserResponse,
    },
    route_guard, AuthService, DynAuthStore, EmailSender, RouteGuard, SessionTokenService,
};
use config::{AuthConfig, UploadConfig};
use error::{ApiError, ErrorResponse};
use uploads::{ImageStore, UPLOADS_PATH};

/// Multipart framing allowance on top of the image size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        handlers::register_handler,
        handlers::login_handler,
        handlers::logout_handler,
        handlers::verify_email_handler,
        handlers::resend_verification_handler,
        handlers::forgot_password_handler,
        handlers::reset_password_handler,
        handlers::get_profile_handler,
        handlers::update_profile_handler,
        handlers::change_password_handler,
        handlers::upload_image_handler,
    ),
    components(
        schemas(
            RegisterRequest, LoginRequest, EmailRequest, ResetPasswordRequest,
            UpdateProfileRequest, ChangePasswordRequest, UserResponse, Role, ProfileView,
            ProfileResponse, ProfileUpdateResponse, AuthResponse, RegisterResponse,
            MessageResponse, ImageUploadResponse, handlers::ImageUploadForm, ErrorResponse,
            HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, sign-in, email verification and password reset"),
        (name = "user", description = "Account settings for the signed-in user"),
        (name = "health", description = "Liveness check")
    ),
    info(
        title = "Auth Starter API",
        version = "1.0.0",
        description = "Credential authentication with email verification, password reset and profile settings"
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub config: Arc<AuthConfig>,
    pub images: ImageStore,
}

impl AppState {
    /// State with images stored under the default upload directory
    pub fn new(store: DynAuthStore, mailer: Arc<dyn EmailSender>, config: AuthConfig) -> Self {
        let config = Arc::new(config);
        Self {
            auth: AuthService::new(store, mailer, config.clone()),
            config,
            images: ImageStore::new(&UploadConfig::default()),
        }
    }

    pub fn with_image_store(mut self, images: ImageStore) -> Self {
        self.images = images;
        self
    }
}

impl FromRef<AppState> for SessionTokenService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.session_tokens().clone()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Handler for GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound {
        resource: format!("Route {}", uri.path()),
    }
}

/// Creates and configures the application router
/// Maps all API endpoints to their handlers, then adds the route guard, request
/// tracing and CORS layers
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let guard = RouteGuard::new(
        state.config.routes.clone(),
        state.auth.session_tokens().clone(),
    );
    let image_body_limit = state.images.max_bytes() + MULTIPART_OVERHEAD_BYTES;
    let uploaded_images = ServeDir::new(state.images.dir());

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health))
        // Auth routes
        .route("/api/auth/register", post(handlers::register_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/verify-email", get(handlers::verify_email_handler))
        .route(
            "/api/auth/resend-verification",
            post(handlers::resend_verification_handler),
        )
        .route("/api/auth/forgot-password", post(handlers::forgot_password_handler))
        .route("/api/auth/reset-password", post(handlers::reset_password_handler))
        // Account settings
        .route(
            "/api/user/profile",
            get(handlers::get_profile_handler).patch(handlers::update_profile_handler),
        )
        .route("/api/user/password", post(handlers::change_password_handler))
        .route(
            "/api/user/image",
            post(handlers::upload_image_handler).layer(DefaultBodyLimit::max(image_body_limit)),
        )
        .nest_service(UPLOADS_PATH, uploaded_images)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(guard, route_guard))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests;
