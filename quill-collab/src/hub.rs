//! Connection registry and inbound dispatch.
//!
//! One task owns the `conn id → connection` map and processes register,
//! unregister, incoming and drop events sequentially, so registry state
//! needs no lock and close-time cleanup runs exactly once per connection.
//!
//! Inbound frames are dispatched by their peeked `"type"`: joins update the
//! connection's site identity and are relayed to one peer for catch-up,
//! targeted frames go to exactly one site, everything else is validated as
//! an operation and fanned out (with an implicit join, so a client that
//! sends an op before announcing itself still lands in the room). Malformed
//! frames are logged and discarded; manager backpressure drops the sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::connection::{Connection, Frame, RegisteredConnection, SEND_BUFFER_SIZE};
use crate::metrics::Metrics;
use crate::protocol;
use crate::room::RoomManagerHandle;

/// Hub inbound queue depth.
pub const INCOMING_BUFFER_SIZE: usize = 8192;
/// Admission deadline for the hub inbound queue.
pub const INCOMING_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) enum HubCommand {
    Register(Connection),
    Unregister { conn_id: u64 },
    Incoming { conn_id: u64, raw: Frame },
    Drop { conn_id: u64 },
}

/// Cloneable front of the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_conn_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Allocates a connection id, registers it with the hub, and returns the
    /// pieces the socket pumps need. `None` once the hub has shut down.
    pub async fn register(&self) -> Option<RegisteredConnection> {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (send_tx, send_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let (closed_tx, closed_rx) = watch::channel(false);
        let conn = Connection::new(id, send_tx, closed_tx);
        self.commands.send(HubCommand::Register(conn)).await.ok()?;
        Some(RegisteredConnection {
            id,
            outbound: send_rx,
            closed: closed_rx,
        })
    }

    /// Queues an inbound frame. False means the connection must be torn
    /// down: either the hub is gone or its queue stayed full past the
    /// admission deadline.
    pub async fn incoming(&self, conn_id: u64, raw: String) -> bool {
        let cmd = HubCommand::Incoming {
            conn_id,
            raw: Arc::new(raw),
        };
        match timeout(INCOMING_SEND_TIMEOUT, self.commands.send(cmd)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                Metrics::global().inc_backpressure_drops();
                log::warn!("conn {conn_id}: hub backpressure, dropping client");
                false
            }
        }
    }

    /// Removes and closes the connection. Idempotent.
    pub async fn unregister(&self, conn_id: u64) {
        let _ = self
            .commands
            .send(HubCommand::Unregister { conn_id })
            .await;
    }

    /// Non-blocking teardown request, safe to call from any task (this is
    /// the rooms' slow-peer drop path).
    pub fn drop_client(&self, conn_id: u64) {
        let _ = self.commands.try_send(HubCommand::Drop { conn_id });
    }
}

struct Hub {
    connections: HashMap<u64, Connection>,
    rooms: RoomManagerHandle,
    shutdown: watch::Receiver<bool>,
}

/// Starts the hub actor.
pub fn spawn(rooms: RoomManagerHandle, shutdown: watch::Receiver<bool>) -> HubHandle {
    let (tx, rx) = mpsc::channel(INCOMING_BUFFER_SIZE);
    let hub = Hub {
        connections: HashMap::new(),
        rooms,
        shutdown,
    };
    tokio::spawn(hub.run(rx));
    HubHandle {
        commands: tx,
        next_conn_id: Arc::new(AtomicU64::new(0)),
    }
}

impl Hub {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                cmd = commands.recv() => match cmd {
                    None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
            }
        }
        for conn in self.connections.values() {
            conn.close();
        }
    }

    async fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(conn) => {
                let id = conn.id;
                self.connections.insert(id, conn);
                Metrics::global().inc_connections();
                Metrics::global().set_active_connections(self.connections.len() as u64);
                log::info!(
                    "client connected conn {id}; {} total",
                    self.connections.len()
                );
            }
            HubCommand::Unregister { conn_id } | HubCommand::Drop { conn_id } => {
                self.remove_connection(conn_id);
            }
            HubCommand::Incoming { conn_id, raw } => {
                self.handle_incoming(conn_id, raw).await;
            }
        }
    }

    fn remove_connection(&mut self, conn_id: u64) {
        if let Some(conn) = self.connections.remove(&conn_id) {
            conn.close();
            self.rooms.leave_all(conn_id);
            Metrics::global().set_active_connections(self.connections.len() as u64);
            log::info!(
                "client disconnected conn {conn_id}; {} total",
                self.connections.len()
            );
        }
    }

    async fn handle_incoming(&mut self, conn_id: u64, raw: Frame) {
        let kind = match protocol::parse_message_type(&raw) {
            Ok(kind) => kind,
            Err(e) => {
                log::warn!("conn {conn_id}: invalid message type: {e}");
                return;
            }
        };
        if !self.connections.contains_key(&conn_id) {
            return;
        }
        match kind.as_str() {
            protocol::TYPE_JOIN => {
                let join = match protocol::validate_join(&raw) {
                    Ok(join) => join,
                    Err(e) => {
                        log::warn!("conn {conn_id}: invalid join: {e}");
                        return;
                    }
                };
                let send = match self.connections.get_mut(&conn_id) {
                    Some(conn) => {
                        conn.site_id = join.site_id.clone();
                        conn.sender()
                    }
                    None => return,
                };
                if !self
                    .rooms
                    .ensure_join(&join.doc_id, conn_id, &join.site_id, send)
                    .await
                {
                    log::warn!("conn {conn_id}: overload, dropping (doc {})", join.doc_id);
                    self.remove_connection(conn_id);
                    return;
                }
                if !self.rooms.forward_join(&join.doc_id, raw, conn_id).await {
                    log::warn!("conn {conn_id}: overload, dropping (doc {})", join.doc_id);
                    self.remove_connection(conn_id);
                }
            }
            k if protocol::is_targeted_kind(k) => {
                let (doc_id, target) = match protocol::parse_targeted(&raw) {
                    Ok(parts) => parts,
                    Err(e) => {
                        log::warn!("conn {conn_id}: invalid targeted message: {e}");
                        return;
                    }
                };
                if !self.rooms.send_to_target(&doc_id, &target, raw).await {
                    log::warn!("conn {conn_id}: overload, dropping (doc {doc_id})");
                    self.remove_connection(conn_id);
                }
            }
            _ => {
                let op = match protocol::validate_operation(&raw) {
                    Ok(op) => op,
                    Err(e) => {
                        log::warn!("conn {conn_id}: invalid message: {e}");
                        return;
                    }
                };
                Metrics::global().inc_ops_processed();
                let send = match self.connections.get(&conn_id) {
                    Some(conn) => conn.sender(),
                    None => return,
                };
                // Implicit membership: an op before an explicit join still
                // seats the sender in the room.
                if !self
                    .rooms
                    .ensure_join(&op.doc_id, conn_id, &op.site_id, send)
                    .await
                {
                    log::warn!("conn {conn_id}: overload, dropping (doc {})", op.doc_id);
                    self.remove_connection(conn_id);
                    return;
                }
                if !self.rooms.broadcast(&op.doc_id, raw, conn_id).await {
                    log::warn!("conn {conn_id}: overload, dropping (doc {})", op.doc_id);
                    self.remove_connection(conn_id);
                }
            }
        }
    }
}
