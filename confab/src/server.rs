//! HTTP/WebSocket front end
//!
//! - `GET /ws`: signaling socket. Text frames carry JSON messages; each socket
//!   is one connection in the SFU core.
//! - `GET /stats`: aggregate room/peer/producer/consumer counters
//! - `GET /health`: liveness probe

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use confab_sfu::{Connection, MessageRouter, Outbound, Sfu, SfuStats};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Close code sent when the server ends a session
const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub outbound_capacity: usize,
    pub max_message_size: usize,
}

/// Build the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let max_message_size = state.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn stats_handler(State(state): State<AppState>) -> Json<SfuStats> {
    Json(state.router.sfu().stats().await)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, mut outbound) = Connection::new(state.outbound_capacity);
    let handle = connection.handle();
    info!(connection_id = %connection.id(), "Signaling connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound queue -> socket
    let connection_id = connection.id().clone();
    let mut writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let frame = match item {
                Outbound::Message(message) => match message.to_json() {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        error!(connection_id = %connection_id, error = %e, "Failed to encode message");
                        continue;
                    }
                },
                Outbound::Close { reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_GOING_AWAY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if let Err(e) = ws_sender.send(frame).await {
                debug!(connection_id = %connection_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    // Socket -> message router
    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.router.handle_text(&handle, text.as_str()).await;
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => state.router.handle_text(&handle, text).await,
                    Err(_) => warn!(connection_id = %handle.id(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %handle.id(), error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    state.router.disconnect(&handle).await;
    drop(connection);
    writer.abort();
    info!(connection_id = %handle.id(), "Signaling connection closed");
}

/// Signaling server: owns the SFU core and the HTTP listener
pub struct ConfabServer {
    config: Config,
    sfu: Arc<Sfu>,
}

impl ConfabServer {
    pub const fn new(config: Config, sfu: Arc<Sfu>) -> Self {
        Self { config, sfu }
    }

    /// Serve until a shutdown signal arrives
    pub async fn start(self) -> anyhow::Result<()> {
        let state = AppState {
            router: MessageRouter::new(Arc::clone(&self.sfu)),
            outbound_capacity: self.config.sfu.outbound_queue_capacity,
            max_message_size: self.config.server.max_message_size,
        };
        let app = create_router(state);

        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        shutdown_signal().await;
        info!("Shutdown signal received, starting graceful shutdown...");
        let _ = shutdown_tx.send(true);

        self.sfu.shutdown();
        if let Err(e) = server.await {
            error!("HTTP server task failed: {}", e);
        }
        info!("Confab server shut down complete");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
