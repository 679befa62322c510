//! API Routes
//!
//! HTTP endpoints for health checks, per-realm status and metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::Metrics;
use crate::config::SeedConfig;
use crate::view::NetworkView;

/// Shared API state
pub struct ApiState {
    pub config: Arc<SeedConfig>,
    pub view: Arc<NetworkView>,
    pub metrics: Arc<Metrics>,
}

/// Build the router without binding it
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP API with its listener already bound
pub struct ApiServer {
    listener: tokio::net::TcpListener,
    app: Router,
}

impl ApiServer {
    /// Bind `0.0.0.0:api_port`. Failing to bind is a startup error.
    pub async fn bind(
        config: Arc<SeedConfig>,
        view: Arc<NetworkView>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("cannot bind HTTP API on {}: {}", addr, e))?;
        let app = router(Arc::new(ApiState {
            config,
            view,
            metrics,
        }));

        let server = Self { listener, app };
        info!("📊 HTTP API server listening on {}", server.local_addr()?);
        Ok(server)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        Ok(())
    }
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Per-realm node counts and the serving parameters
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let realms = state.view.stats().await;
    let fresh: usize = realms.iter().map(|r| r.fresh_nodes).sum();

    let status = serde_json::json!({
        "status": if fresh > 0 { "serving" } else { "warming_up" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "root_domain": state.config.root_domain,
        "network": state.config.network,
        "freshness_window_secs": state.view.freshness_window_secs(),
        "num_results": state.config.num_results,
        "realms": realms,
    });

    Json(status)
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
