// Authentication module
// Credentials, verification tokens, sessions and route protection

pub mod credentials;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod session;
pub mod token;
pub mod verification;

// Re-export commonly used types
pub use error::AuthError;
pub use guard::{route_guard, GuardDecision, RouteClass, RouteGuard};
pub use mailer::{EmailSender, MemoryEmailSender, TracingEmailSender};
pub use middleware::AuthenticatedUser;
pub use models::{OAuthProfile, Role, User, UserResponse};
pub use repository::{DynAuthStore, MemoryAuthStore, PgAuthStore};
pub use service::AuthService;
pub use session::{SessionMinter, SessionToken};
pub use token::{Claims, SessionTokenService};
