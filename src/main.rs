use anyhow::{Context, Result};
use std::sync::Arc;
use storesync::api::{create_router, AppState};
use storesync::catalog::{CatalogRepository, SqliteCatalogStore};
use storesync::config::load_config;
use storesync::credentials::{CredentialStore, SqliteCredentialStore};
use storesync::oauth::{run_state_cleanup, OAuthAuthenticator, OAuthProviderConfig, StateManager};
use storesync::shopify::{CatalogClient, CatalogSource};
use storesync::sync::{CatalogIngestor, SyncScheduler};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storesync=info".into()),
        )
        .init();

    info!("storesync starting...");

    let config_path = std::env::var("STORESYNC_CONFIG").ok();
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

    info!(
        port = config.server.port,
        database_path = %config.storage.database_path,
        api_version = %config.shopify.api_version,
        sync_interval_seconds = config.scheduler.interval_seconds,
        max_concurrency = config.scheduler.max_concurrency,
        "Configuration loaded"
    );

    let credential_store: Arc<dyn CredentialStore> = Arc::new(
        SqliteCredentialStore::new(&config.storage.database_path, &config.storage.encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let catalog: Arc<dyn CatalogRepository> = Arc::new(
        SqliteCatalogStore::new(&config.storage.database_path)
            .context("Failed to initialize catalog store")?,
    );
    info!("Catalog store initialized");

    let source: Arc<dyn CatalogSource> = Arc::new(
        CatalogClient::new(config.shopify.clone()).context("Failed to build catalog client")?,
    );
    let ingestor = Arc::new(CatalogIngestor::new(source, Arc::clone(&catalog)));

    // States live in memory; the cleanup task shares the same map.
    let state_manager = StateManager::new(config.oauth.state_ttl_seconds);
    tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        config.oauth.state_cleanup_interval_seconds,
    ));

    let authenticator = Arc::new(OAuthAuthenticator::new(
        OAuthProviderConfig::from_app_config(&config),
        config.shopify.clone(),
        state_manager,
        Arc::clone(&credential_store),
        Arc::clone(&ingestor),
        config.scheduler.sync_timeout(),
    )?);

    let scheduler = Arc::new(SyncScheduler::new(
        Arc::clone(&credential_store),
        Arc::clone(&ingestor),
        &config.scheduler,
    ));
    let scheduler_handle = scheduler.start();
    info!("Sync scheduler started");

    let router = create_router(AppState {
        authenticator,
        catalog,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind HTTP port")?;
    info!(port = config.server.port, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Lets an in-flight tick finish before exiting.
    scheduler_handle.shutdown().await;
    info!("storesync stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        return;
    }
    info!("Shutdown signal received");
}
