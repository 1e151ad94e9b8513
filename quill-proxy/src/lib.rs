//! # quill-proxy — document-affine WebSocket proxy
//!
//! Pins every document to a single backend so all of its editors meet in
//! one room, whichever proxy instance they entered through.
//!
//! ```text
//! Client ──ws──► Proxy ── rendezvous(docId, healthy backends) ──► Backend
//!                 │                                                  ▲
//!                 └── health loop (GET /health every 8 s) ───────────┘
//! ```
//!
//! Selection is rendezvous (highest-random-weight) hashing: stable per doc,
//! and removing a backend only re-routes the docs that backend owned. A
//! failed dial retries once against each remaining healthy backend before
//! the client is closed with an internal error.

pub mod health;
pub mod selector;
pub mod server;

pub use selector::Selector;
pub use server::{run, ProxyConfig, ProxyError};
