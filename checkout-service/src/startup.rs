//! Application startup and lifecycle management.

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::{Config, StoreBackend};
use crate::handlers;
use crate::services::{
    CallbackReconciler, EsewaGateway, InMemoryTransactionStore, InitiationService,
    MongoTransactionStore, TransactionStore,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TransactionStore>,
    pub initiation: InitiationService,
    pub reconciler: CallbackReconciler,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn TransactionStore>) -> Self {
        let gateway = EsewaGateway::new(config.gateway.clone());
        let initiation = InitiationService::new(store.clone(), gateway.clone());
        let reconciler = CallbackReconciler::new(store.clone(), gateway, config.client.clone());

        Self {
            config,
            store,
            initiation,
            reconciler,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/payments/initiate",
            post(handlers::checkout::initiate_checkout),
        )
        .route(
            "/payments/esewa/success",
            get(handlers::callbacks::esewa_success).post(handlers::callbacks::esewa_success),
        )
        .route(
            "/payments/esewa/failure",
            get(handlers::callbacks::esewa_failure).post(handlers::callbacks::esewa_failure),
        )
        .route(
            "/payments/:transaction_uuid",
            get(handlers::transactions::get_transaction),
        )
        .route("/ops/anomalies", get(handlers::ops::list_anomalies))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                // Path only: callback query strings carry payment data.
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application, connecting the configured store backend.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn TransactionStore> = match config.database.backend {
            StoreBackend::Mongo => {
                let mut client_options =
                    ClientOptions::parse(config.database.url.expose_secret()).await?;
                client_options.app_name = Some(config.service_name.clone());

                let client = Client::with_options(client_options)?;
                let db = client.database(&config.database.db_name);

                let store = MongoTransactionStore::new(&db);
                store.init_indexes().await?;
                tracing::info!(database = %config.database.db_name, "MongoDB transaction store ready");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory transaction store; data is lost on restart");
                Arc::new(InMemoryTransactionStore::new())
            }
        };

        Self::with_store(config, store).await
    }

    /// Build the application over an existing store.
    pub async fn with_store(
        config: Config,
        store: Arc<dyn TransactionStore>,
    ) -> anyhow::Result<Self> {
        // Port 0 binds a random port, used by tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state: AppState::new(config, store),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!(port = self.port, "Checkout service listening");

        axum::serve(self.listener, build_router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
