//! Upgrade, pin, tunnel.
//!
//! `GET /ws?doc=…` validates the doc id, picks the owning backend by
//! rendezvous hash, dials it (retrying once against each other healthy
//! backend), then forwards frames both ways. Frame order is preserved per
//! direction because each direction is a single sequential forwarder.

use std::sync::Arc;

use axum::extract::ws::{
    close_code, CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket,
    WebSocketUpgrade,
};
use axum::extract::{Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use quill_collab::validate;

use crate::health;
use crate::selector::Selector;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("WS_BACKENDS is required (comma-separated backend URLs, e.g. http://localhost:8081,http://localhost:8082)")]
    MissingBackends,
    #[error("proxy io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Proxy configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: String,
    pub backends: Vec<String>,
}

impl ProxyConfig {
    /// `WS_BACKENDS` (required, comma-separated base URLs) and `PORT`
    /// (default 8080).
    pub fn from_env() -> Result<Self, ProxyError> {
        let raw = std::env::var("WS_BACKENDS").unwrap_or_default();
        let backends: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if backends.is_empty() {
            return Err(ProxyError::MissingBackends);
        }
        let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        Ok(ProxyConfig {
            bind_addr: format!("0.0.0.0:{port}"),
            backends,
        })
    }
}

#[derive(Clone)]
struct ProxyState {
    selector: Arc<Selector>,
    healthy: Arc<RwLock<Vec<String>>>,
}

/// Serves the proxy until the shutdown signal fires.
pub async fn run(config: ProxyConfig, shutdown: watch::Receiver<bool>) -> Result<(), ProxyError> {
    let selector = Arc::new(Selector::new(config.backends.clone()));
    let healthy = Arc::new(RwLock::new(config.backends.clone()));
    tokio::spawn(health::run_health_checks(
        config.backends.clone(),
        selector.clone(),
        healthy.clone(),
        shutdown.clone(),
    ));

    let state = ProxyState { selector, healthy };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    log::info!(
        "proxy listening on {} with backends {:?}",
        listener.local_addr()?,
        config.backends
    );
    let mut stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    doc: Option<String>,
}

async fn ws_handler(
    State(state): State<ProxyState>,
    Query(query): Query<WsQuery>,
    RawQuery(raw_query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    let doc = match query.doc.as_deref() {
        Some(doc) => match validate::doc_id(doc) {
            Ok(()) => doc.to_string(),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid or missing doc query parameter: {e}"),
                )
                    .into_response();
            }
        },
        None => {
            return (
                StatusCode::BAD_REQUEST,
                "invalid or missing doc query parameter: doc id is required".to_string(),
            )
                .into_response();
        }
    };
    let Some(primary) = state.selector.backend(&doc).await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no backends").into_response();
    };
    let query_string = raw_query.unwrap_or_default();
    ws.on_upgrade(move |client| tunnel(client, doc, primary, query_string, state))
}

async fn tunnel(
    mut client: WebSocket,
    doc: String,
    primary: String,
    query_string: String,
    state: ProxyState,
) {
    let mut backend = match dial(&primary, &query_string).await {
        Ok(socket) => Some(socket),
        Err(e) => {
            log::warn!("proxy dial {primary} failed for doc {doc}: {e}");
            None
        }
    };
    if backend.is_none() {
        // Failover: try each other healthy backend once, in order.
        let others: Vec<String> = state
            .healthy
            .read()
            .await
            .iter()
            .filter(|b| **b != primary)
            .cloned()
            .collect();
        for other in others {
            match dial(&other, &query_string).await {
                Ok(socket) => {
                    log::info!("proxy dial retry succeeded for doc {doc} via {other}");
                    backend = Some(socket);
                    break;
                }
                Err(e) => log::warn!("proxy dial retry {other} failed for doc {doc}: {e}"),
            }
        }
    }
    let Some(backend) = backend else {
        let _ = client
            .send(ClientMessage::Close(Some(ClientCloseFrame {
                code: close_code::ERROR,
                reason: "backend unavailable".into(),
            })))
            .await;
        return;
    };

    let (mut backend_tx, mut backend_rx) = backend.split();
    let (mut client_tx, mut client_rx) = client.split();

    let client_to_backend = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let Some(out) = client_frame_to_backend(msg) else {
                continue;
            };
            if backend_tx.send(out).await.is_err() {
                break;
            }
        }
    };
    let backend_to_client = async {
        while let Some(Ok(msg)) = backend_rx.next().await {
            let Some(out) = backend_frame_to_client(msg) else {
                continue;
            };
            if client_tx.send(out).await.is_err() {
                break;
            }
        }
    };
    // Either side closing tears the tunnel down; both halves drop here.
    tokio::select! {
        _ = client_to_backend => {}
        _ = backend_to_client => {}
    }
}

async fn dial(
    base: &str,
    query_string: &str,
) -> Result<BackendSocket, tokio_tungstenite::tungstenite::Error> {
    let url = if query_string.is_empty() {
        format!("{}/ws", ws_base(base))
    } else {
        format!("{}/ws?{query_string}", ws_base(base))
    };
    let (socket, _) = connect_async(&url).await?;
    Ok(socket)
}

/// Rewrites an http(s) base URL to its ws(s) equivalent, dropping any path,
/// query or fragment.
fn ws_base(base: &str) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            let scheme = match url.scheme() {
                "https" | "wss" => "wss",
                _ => "ws",
            };
            let _ = url.set_scheme(scheme);
            url.set_path("");
            url.set_query(None);
            url.set_fragment(None);
            url.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1),
    }
}

fn client_frame_to_backend(msg: ClientMessage) -> Option<BackendMessage> {
    match msg {
        ClientMessage::Text(text) => Some(BackendMessage::Text(text)),
        ClientMessage::Binary(bytes) => Some(BackendMessage::Binary(bytes)),
        ClientMessage::Ping(payload) => Some(BackendMessage::Ping(payload)),
        ClientMessage::Pong(payload) => Some(BackendMessage::Pong(payload)),
        ClientMessage::Close(frame) => Some(BackendMessage::Close(frame.map(|f| {
            BackendCloseFrame {
                code: f.code.into(),
                reason: f.reason,
            }
        }))),
    }
}

fn backend_frame_to_client(msg: BackendMessage) -> Option<ClientMessage> {
    match msg {
        BackendMessage::Text(text) => Some(ClientMessage::Text(text)),
        BackendMessage::Binary(bytes) => Some(ClientMessage::Binary(bytes)),
        BackendMessage::Ping(payload) => Some(ClientMessage::Ping(payload)),
        BackendMessage::Pong(payload) => Some(ClientMessage::Pong(payload)),
        BackendMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| {
            ClientCloseFrame {
                code: f.code.into(),
                reason: f.reason,
            }
        }))),
        // Raw frames never surface from a read loop.
        BackendMessage::Frame(_) => None,
    }
}
