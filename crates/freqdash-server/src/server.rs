use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use freqdash_settings::ServerSettings;
use freqdash_sync::DashboardSync;

use crate::client::{self, ClientRegistry};
use crate::push::{PushBridge, PushFrame};

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            max_send_queue: 256,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_send_queue: settings.max_send_queue,
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<DashboardSync>,
    pub client_registry: Arc<ClientRegistry>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/connection", get(connection_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. The returned handle keeps the background tasks alive.
pub async fn start(config: ServerConfig, sync: Arc<DashboardSync>) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let push = PushBridge::start(Arc::clone(&client_registry), &sync);
    let cleanup = client::start_cleanup_task(Arc::clone(&client_registry), Duration::from_secs(60));

    let router = build_router(AppState {
        sync,
        client_registry: Arc::clone(&client_registry),
    });

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "dashboard server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "dashboard server failed");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry: client_registry,
        shutdown,
        _server: server,
        _push: push,
        cleanup,
    })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<ClientRegistry>,
    shutdown: CancellationToken,
    _server: tokio::task::JoinHandle<()>,
    _push: PushBridge,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn client_count(&self) -> usize {
        self.registry.count()
    }

    /// Stop accepting connections and let in-flight requests finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cleanup.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "dashboard client connected");

    let initial = [
        PushFrame::Snapshot {
            data: state.sync.aggregator().snapshot(),
        },
        PushFrame::connection(state.sync.connection()),
    ];
    for frame in initial {
        if let Some(json) = frame.to_json() {
            let _ = state.client_registry.send_to(&client_id, json);
        }
    }

    client::handle_ws_connection(socket, client_id, rx, state.client_registry).await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connection": state.sync.connection().state(),
        "clients": state.client_registry.count(),
    }))
}

async fn snapshot_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sync.aggregator().snapshot())
}

async fn connection_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connection = state.sync.connection();
    Json(json!({
        "state": connection.state(),
        "url": connection.url(),
        "reconnectAttempts": connection.reconnect_attempts(),
    }))
}

async fn refresh_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.sync.aggregator().poll().await;
    Json(json!({
        "report": report,
        "snapshot": state.sync.aggregator().snapshot(),
    }))
}
