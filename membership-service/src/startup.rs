//! Application startup and lifecycle management.

use crate::config::{MembershipConfig, StoreBackend};
use crate::handlers::{self, billing, check_ins, ledger, memberships, settings};
use crate::services::{
    http_metrics_middleware, init_metrics, AccountService, BillingEngine, Clock, Database,
    GymStore, MemoryStore, MembershipStore, SystemClock,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MembershipConfig,
    pub store: Arc<dyn GymStore>,
    pub accounts: AccountService,
    pub engine: Arc<BillingEngine>,
    pub clock: Arc<dyn Clock>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_addr: SocketAddr,
    http_listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
    listener_task: Option<JoinHandle<()>>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: MembershipConfig) -> Result<Self, AppError> {
        init_metrics();

        let shutdown = CancellationToken::new();
        let (store, listener_task): (Arc<dyn GymStore>, Option<JoinHandle<()>>) =
            match &config.store {
                StoreBackend::Postgres(database) => {
                    let db = Database::new(database).await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                        e
                    })?;

                    db.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        e
                    })?;

                    db.refresh_all().await?;
                    let task = db.spawn_change_listener(shutdown.child_token());
                    let store: Arc<dyn GymStore> = Arc::new(db);
                    (store, Some(task))
                }
                StoreBackend::Memory => {
                    tracing::warn!("Using in-memory store; data is lost on restart");
                    let store: Arc<dyn GymStore> = Arc::new(MemoryStore::new());
                    (store, None)
                }
            };

        let mut app = Self::build_with_store(config, store, Arc::new(SystemClock)).await?;
        app.shutdown = shutdown;
        app.listener_task = listener_task;
        Ok(app)
    }

    /// Build around an existing store and clock.
    pub async fn build_with_store(
        config: MembershipConfig,
        store: Arc<dyn GymStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let engine = Arc::new(BillingEngine::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.billing.interval,
        ));
        let accounts = AccountService::new(Arc::clone(&store), Arc::clone(&clock));

        let bind_addr = (config.common.host.as_str(), config.common.port);
        let http_listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            tracing::error!(
                error = %e,
                host = %config.common.host,
                port = config.common.port,
                "Failed to bind HTTP listener"
            );
            AppError::from(e)
        })?;
        let http_addr = http_listener.local_addr()?;

        tracing::info!(
            http_addr = %http_addr,
            store = config.store.name(),
            "Membership service listener bound"
        );

        Ok(Self {
            http_addr,
            http_listener,
            state: AppState {
                config,
                store,
                accounts,
                engine,
                clock,
            },
            shutdown: CancellationToken::new(),
            listener_task: None,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_addr.port()
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn engine(&self) -> Arc<BillingEngine> {
        Arc::clone(&self.state.engine)
    }

    /// Token that stops the billing engine and change listener when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            .route(
                "/memberships",
                get(memberships::list_memberships).post(memberships::create_membership),
            )
            .route(
                "/memberships/:id",
                get(memberships::get_membership)
                    .patch(memberships::update_membership)
                    .delete(memberships::delete_membership),
            )
            .route(
                "/memberships/:id/payments",
                post(memberships::register_payment),
            )
            .route("/ledger", get(ledger::list_ledger).post(ledger::create_entry))
            .route(
                "/ledger/:id",
                axum::routing::patch(ledger::update_entry).delete(ledger::delete_entry),
            )
            .route(
                "/settings",
                get(settings::get_settings).put(settings::put_settings),
            )
            .route(
                "/check-ins",
                get(check_ins::list_check_ins).post(check_ins::check_in),
            )
            .route("/check-ins/:id/checkout", post(check_ins::check_out))
            .route("/billing/run", post(billing::run_billing))
            .route("/billing/last-run", get(billing::last_run))
            .layer(middleware::from_fn(http_metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state)
    }

    /// Serve HTTP and run the billing engine until the shutdown token fires.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.shutdown.clone();

        let engine_task = if self.state.config.billing.enabled {
            let engine = Arc::clone(&self.state.engine);
            let memberships = self.state.store.subscribe_memberships();
            Some(tokio::spawn(engine.run(memberships, shutdown.child_token())))
        } else {
            tracing::warn!("Automatic billing disabled");
            None
        };

        tracing::info!(
            service = "membership-service",
            version = env!("CARGO_PKG_VERSION"),
            http_addr = %self.http_addr,
            billing_interval_secs = self.state.config.billing.interval.as_secs(),
            "Service ready to accept connections"
        );

        let router = Self::router(self.state);
        let server_shutdown = shutdown.clone();
        let result = axum::serve(self.http_listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;

        // Let an in-flight billing run finish its writes before exiting.
        shutdown.cancel();
        if let Some(task) = engine_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Billing engine task failed");
            }
        }
        if let Some(task) = self.listener_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Change listener task failed");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
