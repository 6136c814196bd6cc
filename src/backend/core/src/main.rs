//! Warden Server - Main entry point

use std::sync::Arc;

use warden_core::{
    api::{self, AppState},
    bootstrap,
    config::Config,
    middleware::Authenticator,
    observability,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    observability::init("warden-server", &config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Warden Server"
    );

    if config.auth.jwt_secret.is_none() && !config.auth.trust_user_header {
        tracing::warn!("No identity source configured; every request is anonymous");
    }
    if config.database.url.is_none() && config.bootstrap.assignments.is_empty() {
        tracing::warn!("In-memory store without bootstrap.assignments; no user can administer it");
    }

    let resolver = Arc::new(bootstrap::build_resolver(&config).await?);
    tracing::info!(
        catalog_version = resolver.catalog().load().version(),
        "Resolver initialized"
    );

    let authenticator = Arc::new(Authenticator::from_config(&config.auth));
    let mut app_state = AppState::new(resolver, authenticator);
    if config.observability.metrics_enabled {
        app_state = app_state.with_metrics(observability::install_metrics_recorder()?);
    }

    let app = api::build_router(app_state);

    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    observability::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
