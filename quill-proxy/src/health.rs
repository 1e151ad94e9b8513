//! Backend liveness probing.
//!
//! Probes every configured backend's `/health` on a fixed cadence and swaps
//! the healthy set into both the selector and the shared list the failover
//! path reads. A backend that stops answering disappears from routing at
//! the next tick; it re-enters the same way.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::selector::Selector;

/// Probe cadence.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(8);
/// Per-probe deadline.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs until the shutdown signal fires. All backends start healthy; the
/// first probe round runs one interval in.
pub async fn run_health_checks(
    all_backends: Vec<String>,
    selector: Arc<Selector>,
    healthy: Arc<RwLock<Vec<String>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let mut ticker = interval_at(
        Instant::now() + HEALTH_CHECK_INTERVAL,
        HEALTH_CHECK_INTERVAL,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let mut alive = Vec::new();
                for base in &all_backends {
                    let url = format!("{base}/health");
                    match client.get(&url).timeout(HEALTH_CHECK_TIMEOUT).send().await {
                        Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                            alive.push(base.clone());
                        }
                        Ok(resp) => {
                            log::debug!("health check {base}: status {}", resp.status());
                        }
                        Err(e) => {
                            log::debug!("health check {base} failed: {e}");
                        }
                    }
                }
                if alive.len() != all_backends.len() {
                    log::warn!(
                        "{} of {} backends healthy",
                        alive.len(),
                        all_backends.len()
                    );
                }
                selector.set_backends(alive.clone()).await;
                *healthy.write().await = alive;
            }
        }
    }
}
