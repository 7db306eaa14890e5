//! Application startup and lifecycle management.

use crate::billing::{BillingSettings, DraftGenerator, InvoiceLifecycle, PreviewEngine};
use crate::config::{StorageBackend, TimeBillingConfig};
use crate::handlers;
use crate::services::{
    init_metrics, BillingStore, HttpInvoiceNotifier, InMemoryBillingStore, InvoiceNotifier,
    MockInvoiceNotifier, PgBillingStore,
};
use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: TimeBillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub preview: PreviewEngine,
    pub generator: DraftGenerator,
    pub lifecycle: InvoiceLifecycle,
}

impl AppState {
    pub fn new(
        config: TimeBillingConfig,
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn InvoiceNotifier>,
    ) -> Self {
        let settings = BillingSettings::from(&config.billing);
        Self {
            preview: PreviewEngine::new(store.clone(), settings.default_tax_rate),
            generator: DraftGenerator::new(store.clone(), settings),
            lifecycle: InvoiceLifecycle::new(store.clone(), notifier),
            store,
            config,
        }
    }
}

/// Build the HTTP router for `state`.
pub fn router(state: AppState) -> Router {
    let invoices = Router::new()
        .route("/", get(handlers::invoices::list_invoices))
        .route("/preview", post(handlers::preview::preview_invoice))
        .route("/generate", post(handlers::invoices::generate_invoice))
        .route(
            "/:id",
            get(handlers::invoices::get_invoice).delete(handlers::invoices::delete_invoice),
        )
        .route("/:id/status", patch(handlers::invoices::update_invoice_status))
        .route("/:id/items", put(handlers::invoices::replace_invoice_items));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1/invoices", invoices)
        .route("/webhooks/payments", post(handlers::webhooks::payment_webhook))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the configured store and notifier.
    pub async fn build(config: TimeBillingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn BillingStore> = match config.storage {
            StorageBackend::Postgres => {
                let db = PgBillingStore::new(
                    &config.database.url,
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Arc::new(InMemoryBillingStore::new())
            }
        };

        let notifier: Arc<dyn InvoiceNotifier> = match config.notification_service_url.as_deref() {
            Some(url) => Arc::new(HttpInvoiceNotifier::new(url)?),
            None => {
                tracing::info!("NOTIFICATION_SERVICE_URL not set; status notifications are logged only");
                Arc::new(MockInvoiceNotifier::new())
            }
        };

        Self::build_with(config, store, notifier).await
    }

    /// Build the application around an existing store and notifier.
    pub async fn build_with(
        config: TimeBillingConfig,
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn InvoiceNotifier>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Timebilling service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState::new(config, store, notifier),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "timebilling-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router(self.state))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
