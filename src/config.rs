// Application configuration
// Loaded once at startup from the environment and passed into constructors

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum accepted length of the session signing secret, in bytes
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

/// Route layout consulted by the route guard and by redirect construction
#[derive(Debug, Clone)]
pub struct RoutePaths {
    pub login: String,
    pub register: String,
    pub reset_password: String,
    pub default_login_redirect: String,
    pub auth_callback_prefix: String,
    pub protected_prefixes: Vec<String>,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            register: "/auth/register".to_string(),
            reset_password: "/auth/reset-password".to_string(),
            default_login_redirect: "/settings".to_string(),
            auth_callback_prefix: "/api/auth".to_string(),
            protected_prefixes: vec![
                "/settings".to_string(),
                "/documentation".to_string(),
                "/dashboard".to_string(),
            ],
        }
    }
}

/// Authentication configuration
///
/// Built once at process start; nothing mutates it afterwards.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Public base URL used to build links sent by email
    pub app_url: String,
    pub session_ttl_secs: i64,
    pub verification_token_ttl_secs: i64,
    pub reset_token_ttl_secs: i64,
    /// Fail issuance when the email sender reports an error
    pub strict_email_delivery: bool,
    pub routes: RoutePaths,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("app_url", &self.app_url)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("verification_token_ttl_secs", &self.verification_token_ttl_secs)
            .field("reset_token_ttl_secs", &self.reset_token_ttl_secs)
            .field("strict_email_delivery", &self.strict_email_delivery)
            .field("routes", &self.routes)
            .finish()
    }
}

impl AuthConfig {
    /// Configuration with default lifetimes and routes around the given secret
    pub fn new(jwt_secret: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
            session_ttl_secs: 30 * 24 * 60 * 60,
            verification_token_ttl_secs: 24 * 60 * 60,
            reset_token_ttl_secs: 60 * 60,
            strict_email_delivery: false,
            routes: RoutePaths::default(),
        }
    }
}

/// Where uploaded profile images go and how large they may be
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Process-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` runs the service on the in-memory store
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub token_sweep_interval: Duration,
    pub uploads: UploadConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT").unwrap_or_else(|| "8080".to_string());
        let bind_addr = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("HOST/PORT".to_string(), e.to_string()))?;

        let jwt_secret =
            lookup("JWT_SECRET").ok_or_else(|| ConfigError::MissingVar("JWT_SECRET".to_string()))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET".to_string(),
                format!("must be at least {} bytes", MIN_JWT_SECRET_LEN),
            ));
        }

        let app_url = lookup("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        url::Url::parse(&app_url)
            .map_err(|e| ConfigError::InvalidValue("APP_URL".to_string(), e.to_string()))?;

        let mut auth = AuthConfig::new(jwt_secret, app_url);
        auth.session_ttl_secs = parse_or_default(&lookup, "SESSION_TTL_SECS", auth.session_ttl_secs)?;
        auth.verification_token_ttl_secs = parse_or_default(
            &lookup,
            "VERIFICATION_TOKEN_TTL_SECS",
            auth.verification_token_ttl_secs,
        )?;
        auth.reset_token_ttl_secs =
            parse_or_default(&lookup, "RESET_TOKEN_TTL_SECS", auth.reset_token_ttl_secs)?;
        auth.strict_email_delivery = parse_or_default(&lookup, "STRICT_EMAIL_DELIVERY", false)?;

        for (key, value) in [
            ("SESSION_TTL_SECS", auth.session_ttl_secs),
            ("VERIFICATION_TOKEN_TTL_SECS", auth.verification_token_ttl_secs),
            ("RESET_TOKEN_TTL_SECS", auth.reset_token_ttl_secs),
        ] {
            if value <= 0 {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be positive".to_string(),
                ));
            }
        }

        let sweep_secs: u64 = parse_or_default(&lookup, "TOKEN_SWEEP_INTERVAL_SECS", 3600)?;

        let mut uploads = UploadConfig::default();
        if let Some(dir) = lookup("UPLOAD_DIR").filter(|dir| !dir.is_empty()) {
            uploads.dir = PathBuf::from(dir);
        }
        uploads.max_bytes = parse_or_default(&lookup, "MAX_UPLOAD_BYTES", uploads.max_bytes)?;
        if uploads.max_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_UPLOAD_BYTES".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            bind_addr,
            token_sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            uploads,
            auth,
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
