//! `GatewayServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracker_log::{EventLog, SessionStore, WatchCounter};
use tracker_settings::{GatewaySettings, LiveSettings};
use tracker_supervisor::{StatusBoard, Supervisor};
use tracker_terminal::TerminalManager;

use crate::channels;
use crate::connections::ConnectionTracker;
use crate::control;
use crate::http;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers and channel tasks.
#[derive(Clone)]
pub struct AppState {
    /// Session resolution and creation.
    pub sessions: SessionStore,
    /// Serialized appender for gateway-written records.
    pub log: Arc<EventLog>,
    /// Terminal session registry.
    pub terminals: Arc<TerminalManager>,
    /// Audio/vision process supervisor.
    pub supervisor: Arc<Supervisor>,
    /// Advisory service flags.
    pub status: Arc<StatusBoard>,
    /// Installed log watches.
    pub watches: WatchCounter,
    /// Open channel connections.
    pub connections: ConnectionTracker,
    /// Live channel tuning.
    pub live: Arc<LiveSettings>,
    /// Per-connection outbound queue length.
    pub send_queue: usize,
    /// Stop services once the last channel client leaves.
    pub stop_when_idle: bool,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl AppState {
    /// Build state from settings.
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            sessions: SessionStore::new(&settings.sessions),
            log: Arc::new(EventLog::new()),
            terminals: TerminalManager::new(&settings.terminal),
            supervisor: Arc::new(Supervisor::new(&settings.services)),
            status: Arc::new(StatusBoard::new()),
            watches: WatchCounter::new(),
            connections: ConnectionTracker::new(),
            live: Arc::new(settings.live.clone()),
            send_queue: settings.server.send_queue,
            stop_when_idle: settings.services.stop_when_idle,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }
}

/// The tracker gateway server.
pub struct GatewayServer {
    settings: GatewaySettings,
    state: AppState,
}

impl GatewayServer {
    /// Create a server; nothing is bound until [`listen`](Self::listen).
    pub fn new(settings: GatewaySettings) -> Self {
        let state = AppState::new(&settings);
        Self { settings, state }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/frame/{id}", get(http::frame))
            .route("/status", get(http::status))
            .route("/session", get(http::session))
            .route("/mcp.json", get(http::mcp_manifest))
            .route("/control/session/create", post(http::create_session))
            .route("/control/bookmark", post(http::bookmark))
            .route("/control/{service}/{action}", post(http::control))
            .fallback(channels::dispatch)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        let token = self.state.shutdown.token();

        if self.state.stop_when_idle {
            drop(tokio::spawn(watch_idle(self.state.clone(), token.clone())));
        }

        let router = self.router();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%local, "gateway listening");
        Ok((local, handle))
    }

    /// Stop accepting, end every channel, kill terminals and stop the
    /// supervised services.
    pub async fn close(&self) {
        self.state.shutdown.shutdown();
        self.state.terminals.shutdown_all();
        self.state.supervisor.shutdown().await;
        self.state.status.clear_services();
        info!("gateway closed");
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}

async fn watch_idle(state: AppState, token: CancellationToken) {
    loop {
        tokio::select! {
            () = state.connections.idle() => {
                if state.connections.open() == 0 {
                    control::idle_stop(&state).await;
                }
            }
            () = token.cancelled() => break,
        }
    }
}
