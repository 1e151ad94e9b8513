//! Process-wide counters and gauges.
//!
//! Everything is an atomic, so the hot paths (broadcast, ingest) never take
//! a lock to account for themselves. Rendering happens only in the
//! `/metrics` handler.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

/// Counter/gauge registry. One static instance serves the process; tests
/// construct their own.
#[derive(Debug)]
pub struct Metrics {
    ops_processed_total: AtomicU64,
    connections_total: AtomicU64,
    backpressure_drops_total: AtomicU64,
    send_skips_total: AtomicU64,
    active_connections: AtomicU64,
    active_rooms: AtomicU64,
    active_peers: AtomicU64,
}

static GLOBAL: Metrics = Metrics::new();

impl Metrics {
    pub const fn new() -> Self {
        Metrics {
            ops_processed_total: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            backpressure_drops_total: AtomicU64::new(0),
            send_skips_total: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            active_rooms: AtomicU64::new(0),
            active_peers: AtomicU64::new(0),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Metrics {
        &GLOBAL
    }

    pub fn inc_ops_processed(&self) {
        self.ops_processed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connections(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_backpressure_drops(&self) {
        self.backpressure_drops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_skips(&self) {
        self.send_skips_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_connections(&self, n: u64) {
        self.active_connections.store(n, Ordering::Relaxed);
    }

    pub fn set_active_rooms(&self, n: u64) {
        self.active_rooms.store(n, Ordering::Relaxed);
    }

    pub fn set_active_peers(&self, n: u64) {
        self.active_peers.store(n, Ordering::Relaxed);
    }

    pub fn ops_processed(&self) -> u64 {
        self.ops_processed_total.load(Ordering::Relaxed)
    }

    pub fn send_skips(&self) -> u64 {
        self.send_skips_total.load(Ordering::Relaxed)
    }

    pub fn backpressure_drops(&self) -> u64 {
        self.backpressure_drops_total.load(Ordering::Relaxed)
    }

    /// Plain-text exposition: a type line and a value line per series.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mut series = |name: &str, kind: &str, value: u64| {
            out.push_str("quill_");
            out.push_str(name);
            out.push(' ');
            out.push_str(kind);
            out.push('\n');
            out.push_str("quill_");
            out.push_str(name);
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        };
        series(
            "ops_processed_total",
            "counter",
            self.ops_processed_total.load(Ordering::Relaxed),
        );
        series(
            "connections_total",
            "counter",
            self.connections_total.load(Ordering::Relaxed),
        );
        series(
            "backpressure_drops_total",
            "counter",
            self.backpressure_drops_total.load(Ordering::Relaxed),
        );
        series(
            "send_skips_total",
            "counter",
            self.send_skips_total.load(Ordering::Relaxed),
        );
        series(
            "active_connections",
            "gauge",
            self.active_connections.load(Ordering::Relaxed),
        );
        series(
            "active_rooms",
            "gauge",
            self.active_rooms.load(Ordering::Relaxed),
        );
        series(
            "active_peers",
            "gauge",
            self.active_peers.load(Ordering::Relaxed),
        );
        out
    }

    /// JSON exposition for `?format=json`.
    pub fn render_json(&self) -> Value {
        json!({
            "ops_processed_total": self.ops_processed_total.load(Ordering::Relaxed),
            "connections_total": self.connections_total.load(Ordering::Relaxed),
            "backpressure_drops_total": self.backpressure_drops_total.load(Ordering::Relaxed),
            "send_skips_total": self.send_skips_total.load(Ordering::Relaxed),
            "active_connections": self.active_connections.load(Ordering::Relaxed),
            "active_rooms": self.active_rooms.load(Ordering::Relaxed),
            "active_peers": self.active_peers.load(Ordering::Relaxed),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
