//! Per-client connection endpoint: two cooperative pumps over one socket.
//!
//! The reader forwards inbound frames to the hub under a read deadline that
//! only keep-alive responses refresh; the writer drains a bounded outbound
//! queue and keeps the link alive with periodic pings. Neither pump blocks
//! the other, and either one ending tears the connection down exactly once.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};

use crate::hub::HubHandle;

/// Deadline for a single outbound write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Read deadline; refreshed only by keep-alive responses.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Keep-alive cadence: 90% of the read deadline.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Maximum inbound frame size.
pub const MAX_MESSAGE_BYTES: usize = 1 << 20;
/// Outbound queue depth per connection.
pub const SEND_BUFFER_SIZE: usize = 2048;

/// A wire frame as routed between actors. Validated UTF-8 JSON; shared so a
/// broadcast enqueues one allocation however many peers receive it.
pub type Frame = Arc<String>;

/// Hub-side view of one client connection.
///
/// Owned by the hub actor; rooms hold clones of the send queue only. The
/// close flag is a watch channel, so closing is naturally idempotent and
/// both pumps observe it.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    /// Site identity, recorded from the client's join (or first op).
    pub site_id: String,
    send: mpsc::Sender<Frame>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(id: u64, send: mpsc::Sender<Frame>, closed: watch::Sender<bool>) -> Self {
        Connection {
            id,
            site_id: String::new(),
            send,
            closed,
        }
    }

    /// A producer handle for this connection's outbound queue.
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.send.clone()
    }

    /// Signals both pumps to finish. Safe to call any number of times.
    pub fn close(&self) {
        let _ = self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Everything the socket task needs after registering with the hub.
pub struct RegisteredConnection {
    pub id: u64,
    pub outbound: mpsc::Receiver<Frame>,
    pub closed: watch::Receiver<bool>,
}

/// Reads frames until error, end-of-stream, deadline, close or shutdown,
/// forwarding each to the hub. The read deadline is armed once at pump
/// start and extended only when the peer answers a keep-alive ping; a peer
/// that streams edits but never pongs still times out. Unregisters the
/// connection on exit.
pub async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    conn_id: u64,
    hub: HubHandle,
    mut closed: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let deadline = sleep(PONG_WAIT);
    tokio::pin!(deadline);
    loop {
        if *closed.borrow() {
            break;
        }
        let msg = tokio::select! {
            _ = closed.changed() => break,
            _ = shutdown.changed() => break,
            _ = deadline.as_mut() => {
                log::warn!("conn {conn_id}: read deadline exceeded");
                break;
            }
            read = ws_rx.next() => match read {
                None => break,
                Some(Err(e)) => {
                    log::debug!("conn {conn_id}: read error: {e}");
                    break;
                }
                Some(Ok(msg)) => msg,
            },
        };
        match msg {
            Message::Text(text) => {
                if !hub.incoming(conn_id, text).await {
                    break;
                }
            }
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if !hub.incoming(conn_id, text).await {
                        break;
                    }
                }
                Err(_) => {
                    log::warn!("conn {conn_id}: non-utf8 binary frame discarded");
                }
            },
            // Keep-alive response: the only event that extends the deadline.
            Message::Pong(_) => {
                deadline.as_mut().reset(Instant::now() + PONG_WAIT);
            }
            // Pings are answered by the transport layer.
            Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }
    hub.unregister(conn_id).await;
}

/// Drains the outbound queue to the socket with a per-frame write deadline
/// and emits keep-alive pings. Ends on write failure, closed queue, close
/// signal or shutdown.
pub async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    conn_id: u64,
    mut outbound: mpsc::Receiver<Frame>,
    mut closed: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = closed.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => match frame {
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                Some(frame) => {
                    match timeout(WRITE_WAIT, ws_tx.send(Message::Text(frame.as_str().to_owned()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::warn!("conn {conn_id}: write error: {e}");
                            break;
                        }
                        Err(_) => {
                            log::warn!("conn {conn_id}: write deadline exceeded");
                            break;
                        }
                    }
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_WAIT, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}
