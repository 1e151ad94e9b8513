//! Per-document rooms and the manager that routes commands to them.
//!
//! A room is a single task owning the peer set of one document; the manager
//! is a single task owning the `doc id → room` map. Nothing else ever sees
//! either map, so membership needs no lock. Commands are tagged enums with
//! exactly one payload each.
//!
//! Send discipline: every push onto a peer's outbound queue is
//! non-blocking. A full queue counts against the peer; at
//! [`DROP_AFTER_FAILURES`] consecutive misses the peer is evicted and its
//! connection torn down. Backpressure stays per-peer: one slow consumer
//! never stalls the room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::timeout;

use crate::connection::Frame;
use crate::metrics::Metrics;
use crate::protocol::PeerJoined;

/// Consecutive send misses before a peer is dropped.
pub const DROP_AFTER_FAILURES: u32 = 5;
/// Admission deadline for pushing a command onto the manager queue.
pub const MANAGER_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Manager command queue depth.
pub const MANAGER_COMMAND_BUFFER: usize = 2048;
/// Per-room command queue depth.
pub const ROOM_COMMAND_BUFFER: usize = 1024;

/// Invoked by a room when a slow peer must lose its connection. Late-bound
/// at startup so the hub and the manager can reference each other.
pub type DropHandler = Arc<dyn Fn(u64) + Send + Sync>;

/// Room/peer counts for the gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    pub rooms: u64,
    pub peers: u64,
}

pub(crate) enum RoomCommand {
    Join {
        conn_id: u64,
        site_id: String,
        send: mpsc::Sender<Frame>,
    },
    Leave {
        conn_id: u64,
    },
    Broadcast {
        raw: Frame,
        exclude: u64,
    },
    ForwardJoinToOnePeer {
        raw: Frame,
        exclude: u64,
    },
    SendToTarget {
        site_id: String,
        raw: Frame,
    },
}

pub(crate) enum ManagerCommand {
    EnsureJoin {
        doc_id: String,
        conn_id: u64,
        site_id: String,
        send: mpsc::Sender<Frame>,
    },
    LeaveAll {
        conn_id: u64,
    },
    Broadcast {
        doc_id: String,
        raw: Frame,
        exclude: u64,
    },
    ForwardJoinToOnePeer {
        doc_id: String,
        raw: Frame,
        exclude: u64,
    },
    SendToTarget {
        doc_id: String,
        target: String,
        raw: Frame,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

struct Peer {
    site_id: String,
    send: mpsc::Sender<Frame>,
    send_failures: u32,
}

/// Attempts a non-blocking delivery. Returns true when the peer has crossed
/// the failure threshold and must be evicted.
fn send_tracked(peer: &mut Peer, raw: &Frame) -> bool {
    match peer.send.try_send(raw.clone()) {
        Ok(()) => {
            peer.send_failures = 0;
            false
        }
        Err(_) => {
            peer.send_failures += 1;
            Metrics::global().inc_send_skips();
            peer.send_failures >= DROP_AFTER_FAILURES
        }
    }
}

struct Room {
    doc_id: String,
    peers_by_conn: HashMap<u64, Peer>,
    conn_by_site: HashMap<String, u64>,
    peer_count: Arc<AtomicU64>,
    on_drop: Arc<RwLock<Option<DropHandler>>>,
}

impl Room {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<RoomCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                cmd = commands.recv() => match cmd {
                    None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
            }
        }
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                conn_id,
                site_id,
                send,
            } => self.join(conn_id, site_id, send).await,
            RoomCommand::Leave { conn_id } => self.leave(conn_id),
            RoomCommand::Broadcast { raw, exclude } => self.broadcast(raw, exclude).await,
            RoomCommand::ForwardJoinToOnePeer { raw, exclude } => {
                self.forward_join(raw, exclude).await
            }
            RoomCommand::SendToTarget { site_id, raw } => {
                self.send_to_target(&site_id, raw).await
            }
        }
    }

    async fn join(&mut self, conn_id: u64, site_id: String, send: mpsc::Sender<Frame>) {
        let newcomer = !self.peers_by_conn.contains_key(&conn_id);
        // A site re-joining from a new connection replaces its old peer.
        if let Some(old_conn) = self.conn_by_site.get(&site_id).copied() {
            if old_conn != conn_id {
                self.peers_by_conn.remove(&old_conn);
            }
        }
        if let Some(prev) = self.peers_by_conn.get(&conn_id) {
            if prev.site_id != site_id {
                let stale = prev.site_id.clone();
                if self.conn_by_site.get(&stale).copied() == Some(conn_id) {
                    self.conn_by_site.remove(&stale);
                }
            }
        }
        self.peers_by_conn.insert(
            conn_id,
            Peer {
                site_id: site_id.clone(),
                send,
                send_failures: 0,
            },
        );
        self.conn_by_site.insert(site_id.clone(), conn_id);
        self.update_peer_count();

        if newcomer && self.peers_by_conn.len() > 1 {
            match PeerJoined::new(self.doc_id.clone(), site_id).encode() {
                Ok(frame) => self.broadcast(Arc::new(frame), conn_id).await,
                Err(e) => log::warn!("room {}: peer_joined encode failed: {e}", self.doc_id),
            }
        }
    }

    fn leave(&mut self, conn_id: u64) {
        if let Some(peer) = self.peers_by_conn.remove(&conn_id) {
            if self.conn_by_site.get(&peer.site_id).copied() == Some(conn_id) {
                self.conn_by_site.remove(&peer.site_id);
            }
            self.update_peer_count();
        }
    }

    async fn broadcast(&mut self, raw: Frame, exclude: u64) {
        let mut evict = Vec::new();
        for (id, peer) in self.peers_by_conn.iter_mut() {
            if *id == exclude {
                continue;
            }
            if send_tracked(peer, &raw) {
                evict.push(*id);
            }
        }
        for conn_id in evict {
            self.evict_slow_peer(conn_id).await;
        }
    }

    async fn forward_join(&mut self, raw: Frame, exclude: u64) {
        let candidates: Vec<u64> = self
            .peers_by_conn
            .keys()
            .copied()
            .filter(|id| *id != exclude)
            .collect();
        if candidates.is_empty() {
            return;
        }
        let pick = candidates[rand::thread_rng().gen_range(0..candidates.len())];
        let should_evict = match self.peers_by_conn.get_mut(&pick) {
            Some(peer) => send_tracked(peer, &raw),
            None => false,
        };
        if should_evict {
            self.evict_slow_peer(pick).await;
        }
    }

    async fn send_to_target(&mut self, site_id: &str, raw: Frame) {
        let Some(conn_id) = self.conn_by_site.get(site_id).copied() else {
            return;
        };
        let should_evict = match self.peers_by_conn.get_mut(&conn_id) {
            Some(peer) => send_tracked(peer, &raw),
            None => false,
        };
        if should_evict {
            self.evict_slow_peer(conn_id).await;
        }
    }

    async fn evict_slow_peer(&mut self, conn_id: u64) {
        if let Some(peer) = self.peers_by_conn.remove(&conn_id) {
            if self.conn_by_site.get(&peer.site_id).copied() == Some(conn_id) {
                self.conn_by_site.remove(&peer.site_id);
            }
            self.update_peer_count();
            log::warn!(
                "room {}: evicting slow peer conn {conn_id} site {}",
                self.doc_id,
                peer.site_id
            );
            let guard = self.on_drop.read().await;
            if let Some(handler) = guard.as_ref() {
                handler(conn_id);
            }
        }
    }

    fn update_peer_count(&self) {
        self.peer_count
            .store(self.peers_by_conn.len() as u64, Ordering::Relaxed);
    }
}

struct RoomEntry {
    commands: mpsc::Sender<RoomCommand>,
    peer_count: Arc<AtomicU64>,
}

struct Manager {
    rooms: HashMap<String, RoomEntry>,
    on_drop: Arc<RwLock<Option<DropHandler>>>,
    shutdown: watch::Receiver<bool>,
}

impl Manager {
    async fn run(mut self, mut commands: mpsc::Receiver<ManagerCommand>) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                cmd = commands.recv() => match cmd {
                    None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
            }
        }
    }

    async fn handle(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::EnsureJoin {
                doc_id,
                conn_id,
                site_id,
                send,
            } => {
                let entry = self.room_entry(&doc_id);
                let _ = entry
                    .commands
                    .send(RoomCommand::Join {
                        conn_id,
                        site_id,
                        send,
                    })
                    .await;
            }
            ManagerCommand::LeaveAll { conn_id } => {
                for entry in self.rooms.values() {
                    let _ = entry.commands.send(RoomCommand::Leave { conn_id }).await;
                }
            }
            ManagerCommand::Broadcast {
                doc_id,
                raw,
                exclude,
            } => {
                if let Some(entry) = self.rooms.get(&doc_id) {
                    let _ = entry.commands.try_send(RoomCommand::Broadcast { raw, exclude });
                }
            }
            ManagerCommand::ForwardJoinToOnePeer {
                doc_id,
                raw,
                exclude,
            } => {
                if let Some(entry) = self.rooms.get(&doc_id) {
                    let _ = entry
                        .commands
                        .try_send(RoomCommand::ForwardJoinToOnePeer { raw, exclude });
                }
            }
            ManagerCommand::SendToTarget {
                doc_id,
                target,
                raw,
            } => {
                if let Some(entry) = self.rooms.get(&doc_id) {
                    let _ = entry
                        .commands
                        .try_send(RoomCommand::SendToTarget {
                            site_id: target,
                            raw,
                        });
                }
            }
            ManagerCommand::Stats { reply } => {
                let peers = self
                    .rooms
                    .values()
                    .map(|e| e.peer_count.load(Ordering::Relaxed))
                    .sum();
                let _ = reply.send(RoomStats {
                    rooms: self.rooms.len() as u64,
                    peers,
                });
            }
        }
    }

    fn room_entry(&mut self, doc_id: &str) -> &RoomEntry {
        let on_drop = self.on_drop.clone();
        let shutdown = self.shutdown.clone();
        self.rooms.entry(doc_id.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(ROOM_COMMAND_BUFFER);
            let peer_count = Arc::new(AtomicU64::new(0));
            let room = Room {
                doc_id: doc_id.to_string(),
                peers_by_conn: HashMap::new(),
                conn_by_site: HashMap::new(),
                peer_count: peer_count.clone(),
                on_drop,
            };
            tokio::spawn(room.run(rx, shutdown));
            log::info!("room created for doc {doc_id}");
            RoomEntry {
                commands: tx,
                peer_count,
            }
        })
    }
}

/// Cloneable front of the manager actor.
#[derive(Clone)]
pub struct RoomManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
    on_drop: Arc<RwLock<Option<DropHandler>>>,
}

/// Starts the manager actor.
pub fn spawn_manager(shutdown: watch::Receiver<bool>) -> RoomManagerHandle {
    let (tx, rx) = mpsc::channel(MANAGER_COMMAND_BUFFER);
    let on_drop: Arc<RwLock<Option<DropHandler>>> = Arc::new(RwLock::new(None));
    let manager = Manager {
        rooms: HashMap::new(),
        on_drop: on_drop.clone(),
        shutdown,
    };
    tokio::spawn(manager.run(rx));
    RoomManagerHandle {
        commands: tx,
        on_drop,
    }
}

impl RoomManagerHandle {
    /// Wires the connection-teardown path. Called once at startup.
    pub async fn set_drop_handler(&self, handler: DropHandler) {
        *self.on_drop.write().await = Some(handler);
    }

    async fn send_admitted(&self, cmd: ManagerCommand, what: &str, doc_id: &str) -> bool {
        match timeout(MANAGER_COMMAND_TIMEOUT, self.commands.send(cmd)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                Metrics::global().inc_backpressure_drops();
                log::warn!("room manager backpressure on {what} for doc {doc_id}");
                false
            }
        }
    }

    /// Registers a peer, creating the room lazily. False means the caller
    /// must drop the client.
    pub async fn ensure_join(
        &self,
        doc_id: &str,
        conn_id: u64,
        site_id: &str,
        send: mpsc::Sender<Frame>,
    ) -> bool {
        self.send_admitted(
            ManagerCommand::EnsureJoin {
                doc_id: doc_id.to_string(),
                conn_id,
                site_id: site_id.to_string(),
                send,
            },
            "ensure_join",
            doc_id,
        )
        .await
    }

    /// Removes the connection from every room. Best-effort.
    pub fn leave_all(&self, conn_id: u64) {
        let _ = self.commands.try_send(ManagerCommand::LeaveAll { conn_id });
    }

    /// Fans `raw` out to every peer of the room except `exclude`.
    pub async fn broadcast(&self, doc_id: &str, raw: Frame, exclude: u64) -> bool {
        self.send_admitted(
            ManagerCommand::Broadcast {
                doc_id: doc_id.to_string(),
                raw,
                exclude,
            },
            "broadcast",
            doc_id,
        )
        .await
    }

    /// Relays a join frame to one randomly chosen peer of the room.
    pub async fn forward_join(&self, doc_id: &str, raw: Frame, exclude: u64) -> bool {
        self.send_admitted(
            ManagerCommand::ForwardJoinToOnePeer {
                doc_id: doc_id.to_string(),
                raw,
                exclude,
            },
            "forward_join",
            doc_id,
        )
        .await
    }

    /// Delivers `raw` to the peer whose site id is `target`, if present.
    pub async fn send_to_target(&self, doc_id: &str, target: &str, raw: Frame) -> bool {
        self.send_admitted(
            ManagerCommand::SendToTarget {
                doc_id: doc_id.to_string(),
                target: target.to_string(),
                raw,
            },
            "send_to_target",
            doc_id,
        )
        .await
    }

    /// Room/peer counts; `None` when the manager is overloaded or gone.
    pub async fn stats(&self) -> Option<RoomStats> {
        let (tx, rx) = oneshot::channel();
        let sent = timeout(
            MANAGER_COMMAND_TIMEOUT,
            self.commands.send(ManagerCommand::Stats { reply: tx }),
        )
        .await;
        match sent {
            Ok(Ok(())) => timeout(MANAGER_COMMAND_TIMEOUT, rx).await.ok()?.ok(),
            _ => None,
        }
    }
}
