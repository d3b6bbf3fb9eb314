//! Membership Service entry point.

use membership_service::config::{MembershipConfig, StoreBackend};
use membership_service::services::init_metrics;
use membership_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = MembershipConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting membership-service"
    );

    init_metrics();

    // Log configuration (mask sensitive values)
    let (db_max_connections, db_min_connections) = match &config.store {
        StoreBackend::Postgres(db) => (Some(db.max_connections), Some(db.min_connections)),
        StoreBackend::Memory => (None, None),
    };
    tracing::info!(
        service_name = %config.service_name,
        http_port = %config.common.port,
        store = config.store.name(),
        db_max_connections = ?db_max_connections,
        db_min_connections = ?db_min_connections,
        billing_enabled = config.billing.enabled,
        billing_interval_secs = config.billing.interval.as_secs(),
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    if let Err(e) = app.run_until_stopped().await {
        tracing::error!(error = %e, "Application error");
        return Err(e);
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
