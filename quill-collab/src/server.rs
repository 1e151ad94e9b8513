//! HTTP surface of the backend: `/health`, `/metrics`, `/ws`.
//!
//! The upgrade path validates the optional `doc` query parameter, registers
//! the socket with the hub and runs the two connection pumps. Everything
//! else on this router is observability.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::connection::{self, RegisteredConnection};
use crate::hub::{self, HubHandle};
use crate::metrics::Metrics;
use crate::room::{self, RoomManagerHandle};
use crate::validate;

/// Hard deadline for graceful shutdown after the stop signal.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Backend configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// `PORT` (default 8080).
    pub fn from_env() -> Self {
        let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        ServerConfig {
            bind_addr: format!("0.0.0.0:{port}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    rooms: RoomManagerHandle,
    shutdown: watch::Receiver<bool>,
}

/// Assembles the actors and serves until the shutdown signal fires.
pub async fn run(config: ServerConfig, shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
    let rooms = room::spawn_manager(shutdown.clone());
    let hub = hub::spawn(rooms.clone(), shutdown.clone());
    let drop_hub = hub.clone();
    rooms
        .set_drop_handler(Arc::new(move |conn_id| drop_hub.drop_client(conn_id)))
        .await;

    let state = AppState {
        hub,
        rooms,
        shutdown: shutdown.clone(),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    log::info!("server listening on {}", listener.local_addr()?);
    let mut stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await?;
    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    format: Option<String>,
}

async fn metrics_handler(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    if let Some(stats) = state.rooms.stats().await {
        Metrics::global().set_active_rooms(stats.rooms);
        Metrics::global().set_active_peers(stats.peers);
    }
    if query.format.as_deref() == Some("json") {
        Json(Metrics::global().render_json()).into_response()
    } else {
        Metrics::global().render_text().into_response()
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    doc: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(doc) = query.doc.as_deref() {
        if let Err(e) = validate::doc_id(doc) {
            return (
                StatusCode::BAD_REQUEST,
                format!("invalid doc query parameter: {e}"),
            )
                .into_response();
        }
        log::info!("ws connect for doc {doc}");
    }
    let AppState { hub, shutdown, .. } = state;
    ws.max_message_size(connection::MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, hub, shutdown))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle, shutdown: watch::Receiver<bool>) {
    let Some(registered) = hub.register().await else {
        return;
    };
    let RegisteredConnection {
        id,
        outbound,
        closed,
    } = registered;
    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(connection::write_pump(
        ws_tx,
        id,
        outbound,
        closed.clone(),
        shutdown.clone(),
    ));
    connection::read_pump(ws_rx, id, hub, closed, shutdown).await;
    let _ = writer.await;
}
