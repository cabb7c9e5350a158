//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::cache::ConversionCache;
use crate::cache::kv::KvStore;
use crate::error::{Error, Result};
use crate::metrics::PrometheusExporter;
use crate::queue::ConversionQueue;
use crate::waiter::WaiterService;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5002,
            enable_cors: true,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime reporting
    pub start_time: Instant,
    /// Conversion cache
    pub cache: Arc<dyn ConversionCache>,
    /// Single-flight conversion queue
    pub queue: Arc<ConversionQueue>,
    /// Coalescing waiter service
    pub waiter: WaiterService,
    /// Prometheus exposition
    pub exporter: Arc<PrometheusExporter>,
    /// KV handle for readiness probing, when one is wired
    pub kv: Option<Arc<dyn KvStore>>,
    /// Bearer token guarding /metrics
    pub metrics_token: Option<String>,
}

impl AppState {
    pub fn new(
        cache: Arc<dyn ConversionCache>,
        queue: Arc<ConversionQueue>,
        waiter: WaiterService,
        exporter: Arc<PrometheusExporter>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            cache,
            queue,
            waiter,
            exporter,
            kv: None,
            metrics_token: None,
        }
    }

    /// Set the KV handle used by the readiness probe.
    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Set the bearer token required by `/metrics`.
    pub fn with_metrics_token(mut self, token: impl Into<String>) -> Self {
        self.metrics_token = Some(token.into());
        self
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Start the server and block until shutdown.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::Api(format!("Invalid address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{addr}");

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Api(format!("Server error: {e}")))?;

        Ok(())
    }
}
