//! `BeaconServer`: Axum HTTP + WebSocket hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use beacon_core::constants::WS_PATH;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broadcast::BroadcastEngine;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::heartbeat::HeartbeatScheduler;
use crate::lifecycle::LifecycleHandler;
use crate::registry::{ConnectionMetadata, ConnectionRegistry};
use crate::session::{SessionContext, run_session};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle handler (owns registry and broadcast engine).
    pub lifecycle: Arc<LifecycleHandler>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The broadcast hub.
pub struct BeaconServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<BroadcastEngine>,
    lifecycle: Arc<LifecycleHandler>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl BeaconServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(BroadcastEngine::new(registry.clone()));
        let lifecycle = Arc::new(LifecycleHandler::new(engine.clone()));
        Self {
            config: Arc::new(config),
            registry,
            engine,
            lifecycle,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            lifecycle: self.lifecycle.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(WS_PATH, get(ws_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::new())
    }

    /// Bind the listener, start the heartbeat, and serve until
    /// [`BeaconServer::shutdown`] completes. Call once.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let addr = listener.local_addr()?;

        let heartbeat = HeartbeatScheduler::with_start(
            self.engine.clone(),
            self.config.heartbeat_interval,
            self.start_time.into(),
        );
        let _heartbeat = tokio::spawn(heartbeat.run(self.shutdown.token()));

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let stop = self.shutdown.listener_token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(stop.cancelled_owned());
            if let Err(error) = serve.await {
                error!(%error, "server error");
            }
            info!("listener stopped");
        });

        info!(%addr, "beacon hub listening");
        Ok((addr, handle))
    }

    /// Run the graceful shutdown sequence.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown
            .graceful_shutdown(&self.engine, self.config.shutdown_timeout)
            .await
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcast engine.
    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    /// Get the lifecycle handler.
    pub fn lifecycle(&self) -> &Arc<LifecycleHandler> {
        &self.lifecycle
    }

    /// Get the shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.lifecycle.registry().size(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let metadata = ConnectionMetadata {
        remote_address: extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };
    let ctx = SessionContext {
        lifecycle: state.lifecycle.clone(),
        ping_interval: state.config.heartbeat_interval,
        pong_timeout: state.config.pong_timeout,
        send_queue_capacity: state.config.send_queue_capacity,
        shutdown: state.shutdown.token(),
        force: state.shutdown.force_token(),
    };
    let sessions = state.shutdown.sessions().clone();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| sessions.track_future(run_session(socket, metadata, ctx)))
}
