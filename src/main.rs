use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use auth_starter_api::{
    auth::{DynAuthStore, MemoryAuthStore, PgAuthStore, TracingEmailSender},
    cleanup, config::AppConfig, create_router, db, uploads::ImageStore, AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for logging
    // RUST_LOG overrides the default `info` level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Auth Starter API - Starting...");

    // Environment (and .env) is read once here
    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;
    tracing::debug!("Loaded configuration: {:?}", config.auth);

    let store: DynAuthStore = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::connect_and_migrate(database_url).await?;
            Arc::new(PgAuthStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            Arc::new(MemoryAuthStore::new())
        }
    };

    let state = AppState::new(store, Arc::new(TracingEmailSender), config.auth.clone())
        .with_image_store(ImageStore::new(&config.uploads));
    tracing::info!("Profile images stored in {}", config.uploads.dir.display());

    tokio::spawn(cleanup::run_token_sweeper(
        state.auth.clone(),
        config.token_sweep_interval,
    ));

    let app = create_router(state);

    tracing::info!("Starting server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    tracing::info!("Auth Starter API is running on http://{}", config.bind_addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
