//! HTTP server for the Prometheus scrape endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::exposition::{CONTENT_TYPE, Renderer};
use crate::scrape::{ScrapeStats, SharedOrchestrator};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: SharedOrchestrator,
    renderer: Arc<Renderer>,
    deadline: Option<Duration>,
}

/// Create the HTTP router.
fn create_router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint: one scrape, then render.
///
/// Always answers 200. Scrape failures show up as `up = 0` or stale values,
/// never as an HTTP error.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let orchestrator = state.orchestrator.clone();
    // Detached so a missed deadline doesn't abort it; late results still land.
    let scrape = tokio::spawn(async move { orchestrator.run().await });

    let joined = match state.deadline {
        Some(deadline) => tokio::time::timeout(deadline, scrape).await.ok(),
        None => Some(scrape.await),
    };

    match joined {
        Some(Ok(_)) => {}
        Some(Err(e)) => error!(error = %e, "Scrape task failed"),
        None => {
            state.orchestrator.record_deadline_exceeded();
            warn!(
                deadline = ?state.deadline,
                "Scrape deadline exceeded, rendering current values"
            );
        }
    }

    let body = state.renderer.render(
        &state.orchestrator.space().snapshot(),
        &state.orchestrator.stats(),
    );

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    targets: Vec<String>,
    collectors: Vec<String>,
    instruments: usize,
    series: usize,
    stats: ScrapeStats,
}

/// Handler for the /status endpoint.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let orchestrator = &state.orchestrator;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        targets: orchestrator
            .targets()
            .map(|t| t.identity().to_string())
            .collect(),
        collectors: orchestrator
            .catalogue()
            .names()
            .into_iter()
            .map(String::from)
            .collect(),
        instruments: orchestrator.space().instrument_count(),
        series: orchestrator.space().series_count(),
        stats: orchestrator.stats(),
    })
}

/// HTTP server configuration.
pub struct HttpServer {
    orchestrator: SharedOrchestrator,
    renderer: Arc<Renderer>,
    listen_addr: SocketAddr,
    metrics_path: String,
    deadline: Option<Duration>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        orchestrator: SharedOrchestrator,
        renderer: Renderer,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            orchestrator,
            renderer: Arc::new(renderer),
            listen_addr,
            metrics_path,
            deadline: None,
        }
    }

    /// Stop waiting for a scrape after `deadline` and render what is there.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build the router without binding a socket.
    pub fn router(&self) -> Router {
        create_router(
            AppState {
                orchestrator: self.orchestrator.clone(),
                renderer: self.renderer.clone(),
                deadline: self.deadline,
            },
            &self.metrics_path,
        )
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = self.router();
        let addr = listener.local_addr().unwrap_or(self.listen_addr);

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Catalogue, CollectorFilter};
    use crate::connector::{Connection, TargetConnector};
    use crate::error::ConnectError;
    use crate::scrape::ScrapeOrchestrator;
    use crate::space::MetricSpace;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pgsight_common::Target;
    use std::collections::HashMap;
    use tower::ServiceExt;

    /// Every target is unreachable, optionally after a delay.
    struct Unreachable {
        delay: Duration,
    }

    #[async_trait]
    impl TargetConnector for Unreachable {
        async fn open(&self, target: &Target) -> Result<Box<dyn Connection>, ConnectError> {
            tokio::time::sleep(self.delay).await;
            Err(ConnectError::Failed {
                address: target.address(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn make_server(path: &str, delay: Duration) -> HttpServer {
        let space = Arc::new(MetricSpace::new());
        let catalogue = Catalogue::build(&space, "pg", &CollectorFilter::default()).unwrap();
        let orchestrator = ScrapeOrchestrator::new(
            vec![Target::new("db1")],
            Arc::new(catalogue),
            Arc::new(Unreachable { delay }),
            space,
        );

        HttpServer::new(
            Arc::new(orchestrator),
            Renderer::new("pg", &HashMap::new()),
            "127.0.0.1:0".parse().unwrap(),
            path.to_string(),
        )
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint_scrapes() {
        let router = make_server("/metrics", Duration::ZERO).router();

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), CONTENT_TYPE);

        let body = body_string(response).await;
        assert!(body.contains("pg_up{host=\"db1\"} 0"));
        assert!(body.contains("pg_exporter_scrapes_total 1"));
    }

    #[tokio::test]
    async fn test_metrics_deadline_still_answers() {
        let server =
            make_server("/metrics", Duration::from_secs(5)).with_deadline(Some(Duration::from_millis(20)));
        let router = server.router();

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(!body.contains("pg_up{"));
        assert!(body.contains("pg_exporter_scrape_timeouts_total 1"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = make_server("/metrics", Duration::ZERO).router();

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let router = make_server("/metrics", Duration::ZERO).router();

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(status["targets"], serde_json::json!(["db1"]));
        assert_eq!(status["collectors"].as_array().unwrap().len(), 10);
        assert_eq!(status["stats"]["scrapes"], 0);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = make_server("/pg/metrics", Duration::ZERO).router();

        // Custom path should work
        let response = router
            .clone()
            .oneshot(Request::get("/pg/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
