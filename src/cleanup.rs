//! Background job removing expired verification and reset tokens.
//!
//! Expired tokens are already rejected on use; this only keeps the table from
//! accumulating links nobody clicked.

use std::time::Duration;

use crate::auth::AuthService;

/// Run the sweep loop.
///
/// Deletes expired tokens every `interval`. Failures are logged and the loop
/// carries on.
pub async fn run_token_sweeper(service: AuthService, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        sweep_once(&service).await;
    }
}

/// Run a single sweep, returning the number of deleted tokens.
pub async fn sweep_once(service: &AuthService) -> u64 {
    match service.purge_expired_tokens().await {
        Ok(0) => {
            tracing::debug!("Token sweep found nothing to delete");
            0
        }
        Ok(deleted) => {
            tracing::info!(deleted = deleted, "Token sweep completed");
            deleted
        }
        Err(e) => {
            tracing::error!(error = %e, "Token sweep failed");
            0
        }
    }
}
