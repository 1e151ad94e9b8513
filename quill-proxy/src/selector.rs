//! Rendezvous (highest-random-weight) backend selection.

use tokio::sync::RwLock;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over `doc_id || backend`. Stable across processes, so every proxy
/// instance agrees on the winner.
fn rendezvous_score(doc_id: &str, backend: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in doc_id.bytes().chain(backend.bytes()) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Routes a doc id to one of the configured backend base URLs. The backend
/// list is swapped wholesale by the health loop and read per request.
pub struct Selector {
    backends: RwLock<Vec<String>>,
}

impl Selector {
    pub fn new(backends: Vec<String>) -> Self {
        Selector {
            backends: RwLock::new(backends),
        }
    }

    /// Replaces the live backend set.
    pub async fn set_backends(&self, backends: Vec<String>) {
        *self.backends.write().await = backends;
    }

    /// The backend owning `doc_id`: maximum rendezvous score, ties broken
    /// by list order. `None` when no backend is live.
    pub async fn backend(&self, doc_id: &str) -> Option<String> {
        let backends = self.backends.read().await;
        if backends.len() <= 1 {
            return backends.first().cloned();
        }
        let mut best: Option<(&String, u32)> = None;
        for candidate in backends.iter() {
            let score = rendezvous_score(doc_id, candidate);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((candidate, score)),
            }
        }
        best.map(|(backend, _)| backend.clone())
    }
}
