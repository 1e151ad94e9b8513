//! # quill-collab — serving plane for real-time collaborative editing
//!
//! Routes CRDT edit operations between the clients of a document over
//! WebSocket. The server never materializes document content; its only
//! state is the live peer membership of each room.
//!
//! ## Architecture
//!
//! ```text
//! Client ──ws──► Connection ──► Hub ──► RoomManager ──► Room (per doc)
//!                (read pump)   (dispatch   (route/create)    │
//!                              by type)                      ▼
//!                                                   peer send queues
//!                                                     (bounded)
//! Client ◄──ws── Connection ◄───────────────────────────────┘
//!                (write pump)
//! ```
//!
//! Every box is a cooperative actor draining a bounded queue; all shared
//! mutable state lives inside exactly one of them. When any queue would
//! overflow past its admission budget, the offending connection is dropped
//! rather than starving the rest.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire envelope, kind-specific validation
//! - [`validate`] — document-identifier syntax
//! - [`metrics`] — process-wide counters and gauges
//! - [`connection`] — per-client read/write pumps with deadlines
//! - [`room`] — per-document room actors and the room manager
//! - [`hub`] — connection registry and inbound dispatch
//! - [`server`] — HTTP surface (`/health`, `/metrics`, `/ws`)

pub mod connection;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod room;
pub mod server;
pub mod validate;

pub use connection::Frame;
pub use hub::HubHandle;
pub use metrics::Metrics;
pub use protocol::{JoinMessage, OpId, Operation, PeerJoined, ProtocolError};
pub use room::{RoomManagerHandle, RoomStats};
pub use server::{run, ServerConfig};
