//! `BridgeServer`: axum WebSocket listener for remote controllers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use gamelink_core::envelope::{self, into_payload, Envelope};
use gamelink_core::ids::SessionId;
use gamelink_core::{EventSink, OpModule, PROTOCOL_VERSION};
use gamelink_telemetry::names;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{run_session, ConnectionContext};
use crate::dispatch::DispatchRouter;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Errors from starting a [`BridgeServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `start` called on a running instance.
    #[error("server already started")]
    AlreadyStarted,

    /// Instances are single-use; a stopped one cannot start again.
    #[error("server has been stopped")]
    Stopped,

    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was tried.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
}

/// `GET /health` body.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok` while the listener answers.
    pub status: &'static str,
    /// Ready sessions.
    pub sessions: usize,
    /// Wire protocol version.
    pub protocol_version: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Running(SocketAddr),
    Stopped,
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    ctx: Arc<ConnectionContext>,
}

/// One listener instance.
///
/// A server starts at most once. [`stop`](Self::stop) is idempotent and safe
/// before start; a reload builds a fresh instance instead of restarting this
/// one.
pub struct BridgeServer {
    config: ServerConfig,
    ctx: Arc<ConnectionContext>,
    lifecycle: Mutex<Lifecycle>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    listener_released: CancellationToken,
}

impl BridgeServer {
    /// Idle server; nothing is bound until [`BridgeServer::start`].
    pub fn new(config: ServerConfig, modules: Vec<Arc<dyn OpModule>>) -> Self {
        let ctx = Arc::new(ConnectionContext {
            router: Arc::new(DispatchRouter::new(modules)),
            registry: Arc::new(SessionRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            shared_secret: config.shared_secret.clone(),
            max_send_queue: config.max_send_queue.max(1),
        });
        Self {
            config,
            ctx,
            lifecycle: Mutex::new(Lifecycle::Idle),
            listener_task: Mutex::new(None),
            listener_released: CancellationToken::new(),
        }
    }

    /// Build the axum router. `/` and `/ws` both accept the WebSocket upgrade.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: Arc::clone(&self.ctx),
        };
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and start accepting connections. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        {
            let mut state = self.lifecycle.lock();
            match *state {
                Lifecycle::Idle => *state = Lifecycle::Starting,
                Lifecycle::Stopped => return Err(ServerError::Stopped),
                Lifecycle::Starting | Lifecycle::Running(_) => {
                    return Err(ServerError::AlreadyStarted)
                }
            }
        }

        let addr = self.config.bind_addr();
        let bound = TcpListener::bind(&addr)
            .await
            .and_then(|listener| listener.local_addr().map(|local| (listener, local)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                warn!(addr, error = %source, "failed to bind bridge server");
                *self.lifecycle.lock() = Lifecycle::Stopped;
                self.ctx.shutdown.shutdown();
                self.listener_released.cancel();
                return Err(ServerError::Bind { addr, source });
            }
        };

        {
            let mut state = self.lifecycle.lock();
            if *state != Lifecycle::Starting {
                drop(listener);
                self.listener_released.cancel();
                return Err(ServerError::Stopped);
            }
            *state = Lifecycle::Running(local_addr);
        }

        let app = self.router();
        let token = self.ctx.shutdown.token();
        let released = self.listener_released.clone();
        let handle = tokio::spawn(async move {
            let _released = released.drop_guard();
            let serve = axum::serve(listener, app).with_graceful_shutdown(token.cancelled_owned());
            if let Err(error) = serve.await {
                warn!(%error, "listener exited with error");
            }
        });
        *self.listener_task.lock() = Some(handle);

        info!(%local_addr, "bridge server listening");
        Ok(local_addr)
    }

    /// Stop accepting connections and close every session. Idempotent.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Stopped => return,
            Lifecycle::Idle => self.listener_released.cancel(),
            Lifecycle::Starting => {}
            Lifecycle::Running(addr) => info!(%addr, "stopping bridge server"),
        }
        self.ctx.shutdown.shutdown();
        self.ctx.registry.close_all();
    }

    /// Wait up to `timeout` for the listener and every session to finish.
    ///
    /// Returns `true` once fully quiesced. After a stop that times out the
    /// listener is torn down anyway, so the port is free when this returns.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let released = tokio::time::timeout_at(deadline, self.listener_released.cancelled())
            .await
            .is_ok();

        if !released {
            if !self.ctx.shutdown.is_shutting_down() {
                return false;
            }
            let handle = self.listener_task.lock().take();
            if let Some(handle) = handle {
                warn!("listener did not stop in time, aborting");
                handle.abort();
                self.listener_released.cancelled().await;
            }
            return false;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.ctx.shutdown.wait(remaining).await
    }

    /// [`stop`](Self::stop), then wait up to the configured shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        self.stop();
        self.wait_stopped(self.config.shutdown_timeout).await
    }

    /// Whether the listener is accepting connections.
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.lifecycle.lock() {
            Lifecycle::Running(addr) => Some(addr),
            _ => None,
        }
    }

    /// Ready sessions.
    pub fn session_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Ready sessions, for inspection.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    /// Configuration this instance was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Push an `evt` to every ready session. Returns how many accepted it.
    pub fn broadcast(&self, kind: &str, payload: Value) -> usize {
        let event = Envelope::evt(kind, into_payload(payload));
        let frame = match envelope::encode(&event) {
            Ok(text) => Arc::new(text),
            Err(error) => {
                warn!(kind, %error, "failed to encode event");
                return 0;
            }
        };
        counter!(names::EVENTS_TOTAL, "kind" => kind.to_owned()).increment(1);
        self.ctx.registry.broadcast(&frame)
    }
}

impl EventSink for BridgeServer {
    fn emit(&self, kind: &str, payload: Value) {
        let _ = self.broadcast(kind, payload);
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// GET `/` and `/ws`.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.ctx.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let guard = state.ctx.shutdown.task_guard();
    let ctx = state.ctx;
    ws.on_upgrade(move |socket| async move {
        run_session(socket, SessionId::new(), ctx).await;
        drop(guard);
    })
}

/// GET `/health`.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.ctx.registry.len();
    debug!(sessions, "health check");
    Json(HealthResponse {
        status: "ok",
        sessions,
        protocol_version: PROTOCOL_VERSION,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_server() -> BridgeServer {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        BridgeServer::new(config, Vec::new())
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let server = make_server();
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let server = make_server();
        let _ = server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
        server.stop();
        assert!(matches!(server.start().await, Err(ServerError::Stopped)));
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let server = make_server();
        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert!(server.wait_stopped(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn double_stop_then_wait_returns_immediately() {
        let server = make_server();
        let _ = server.start().await.unwrap();
        assert!(server.shutdown().await);
        server.stop();
        assert!(server.wait_stopped(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn wait_without_stop_times_out() {
        let server = make_server();
        let _ = server.start().await.unwrap();
        assert!(!server.wait_stopped(Duration::from_millis(20)).await);
        assert!(server.is_running());
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn port_is_released_after_stop() {
        let server = make_server();
        let addr = server.start().await.unwrap();
        assert!(server.shutdown().await);
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = BridgeServer::new(
            ServerConfig {
                host: "127.0.0.1".into(),
                port,
                ..ServerConfig::default()
            },
            Vec::new(),
        );
        assert!(matches!(server.start().await, Err(ServerError::Bind { .. })));
        assert!(!server.is_running());
        assert!(server.wait_stopped(Duration::from_millis(100)).await);
    }

    #[test]
    fn broadcast_with_no_sessions_is_noop() {
        let server = make_server();
        assert_eq!(server.broadcast("Player.Join", serde_json::json!({"n": 1})), 0);
    }

    #[test]
    fn health_body_shape() {
        let body = serde_json::to_value(HealthResponse {
            status: "ok",
            sessions: 2,
            protocol_version: PROTOCOL_VERSION,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"status": "ok", "sessions": 2, "protocolVersion": 1}));
    }
}
