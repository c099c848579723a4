//! `DsvpServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use dsvp_store::CredentialStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::http_auth::{self, Authenticated};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::serve_socket;
use crate::websocket::registry::WorkerRegistry;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live worker sockets.
    pub registry: Arc<WorkerRegistry>,
    /// Credential store used by the HTTP guards.
    pub store: Arc<dyn CredentialStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The coordinator server. Owns the worker registry.
pub struct DsvpServer {
    config: Arc<ServerConfig>,
    store: Arc<dyn CredentialStore>,
    registry: Arc<WorkerRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl DsvpServer {
    /// Create a new server over `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(WorkerRegistry::new(store.clone())),
            store,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let user_routes = Router::new()
            .route("/work/", post(create_work))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                http_auth::require_user,
            ));

        let worker_routes = Router::new()
            .route("/work/{unit}/file", get(download_file).post(upload_file))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                http_auth::require_worker,
            ));

        Router::new()
            .route("/", get(root_handler))
            .route("/favicon.ico", get(not_found))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/sock", get(ws_handler))
            .merge(user_routes)
            .merge(worker_routes)
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("server stopped");
        });

        info!(%addr, "coordinator listening");
        Ok((addr, handle))
    }

    /// The worker registry.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.registry.authenticated_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /sock: upgrade into a worker socket.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let cancel = state.shutdown.child_token();
    let tracked = state.shutdown.track_socket();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            serve_socket(socket, state.registry, state.config, cancel).await;
            drop(tracked);
        })
}

/// POST /work/
async fn create_work(Extension(caller): Extension<Authenticated>) -> StatusCode {
    debug!(key = %caller.key, "work submission");
    StatusCode::NOT_IMPLEMENTED
}

/// GET /work/{unit}/file
async fn download_file(
    Path(unit): Path<String>,
    Extension(caller): Extension<Authenticated>,
) -> StatusCode {
    debug!(key = %caller.key, unit, "work file download");
    StatusCode::NOT_IMPLEMENTED
}

/// POST /work/{unit}/file
async fn upload_file(
    Path(unit): Path<String>,
    Extension(caller): Extension<Authenticated>,
) -> StatusCode {
    debug!(key = %caller.key, unit, "work file upload");
    StatusCode::NOT_IMPLEMENTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
    use axum::http::{Method, Request};
    use dsvp_core::CredentialKey;
    use dsvp_store::MemoryStore;
    use tower::ServiceExt;

    const TOKEN: &str = "ZHN2cA==";

    fn make_server() -> (DsvpServer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (DsvpServer::new(ServerConfig::default(), store.clone()), store)
    }

    fn request(method: Method, uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn root_returns_ok() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::GET, "/", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn favicon_and_unknown_paths_are_404() {
        let (server, _) = make_server();
        for uri in ["/favicon.ico", "/nonexistent", "/work/7"] {
            let resp = server
                .router()
                .oneshot(request(Method::GET, uri, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::GET, "/health", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["authenticated"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::GET, "/metrics", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders_text() {
        let (server, _) = make_server();
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let resp = server
            .with_metrics(handle)
            .router()
            .oneshot(request(Method::GET, "/metrics", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sock_without_upgrade_is_rejected() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::GET, "/sock", None))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn worker_route_without_credentials_is_challenged() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::GET, "/work/7/file", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[WWW_AUTHENTICATE], "Bearer realm=\"dsvp\"");
    }

    #[tokio::test]
    async fn malformed_bearer_is_challenged() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::POST, "/work/7/file", Some("%%%")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_worker_key_is_401() {
        let (server, _) = make_server();
        let resp = server
            .router()
            .oneshot(request(Method::GET, "/work/7/file", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn known_worker_key_reaches_handler() {
        let (server, store) = make_server();
        store.add_worker(CredentialKey::from_token(TOKEN).unwrap());
        for method in [Method::GET, Method::POST] {
            let resp = server
                .router()
                .oneshot(request(method, "/work/7/file", Some(TOKEN)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        }
    }

    #[tokio::test]
    async fn worker_key_is_not_a_user_key() {
        let (server, store) = make_server();
        store.add_worker(CredentialKey::from_token(TOKEN).unwrap());
        let resp = server
            .router()
            .oneshot(request(Method::POST, "/work/", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn known_user_key_reaches_handler() {
        let (server, store) = make_server();
        store.add_user(CredentialKey::from_token(TOKEN).unwrap());
        let resp = server
            .router()
            .oneshot(request(Method::POST, "/work/", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn store_failure_is_500() {
        let (server, store) = make_server();
        store.set_unavailable(true);
        let resp = server
            .router()
            .oneshot(request(Method::POST, "/work/", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn shutdown_is_observable() {
        let (server, _) = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }
}
