//! Seeded delivery fabric: delay, duplication, reordering.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::position::Position;
use crate::sim::SimClient;

/// Operation identity: locally monotone counter per site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimOpId {
    pub site: String,
    pub counter: i64,
}

/// One replicated edit as it travels the simulated network.
///
/// Undo inverses carry `inverse_op_id` naming the op they reverse; the
/// network (like the real server) treats them as ordinary ops.
#[derive(Debug, Clone)]
pub struct SimOp {
    pub site_id: String,
    pub op_id: SimOpId,
    pub position: Position,
    pub value: char,
    pub deleted: bool,
    pub inverse_op_id: Option<SimOpId>,
}

/// Knobs for the chaos schedule. Fully determined by `seed`.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    pub seed: u64,
    pub duplicate_prob: f64,
    pub max_delay: u64,
    pub shuffle: bool,
}

impl ChaosConfig {
    pub fn with_seed(seed: u64) -> Self {
        ChaosConfig {
            seed,
            duplicate_prob: 0.2,
            max_delay: 50,
            shuffle: true,
        }
    }
}

struct Delivery {
    op: SimOp,
    at: u64,
}

/// Collects sent ops and delivers them to every client under the configured
/// chaos: each op gets a random delivery tick, and with `duplicate_prob` a
/// second, later delivery of the same op.
pub struct ChaosNetwork {
    pending: Vec<SimOp>,
    config: ChaosConfig,
}

impl ChaosNetwork {
    pub fn new(config: ChaosConfig) -> Self {
        ChaosNetwork {
            pending: Vec::new(),
            config,
        }
    }

    /// Queues an op for the next delivery round.
    pub fn send(&mut self, op: SimOp) {
        self.pending.push(op);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Delivers every pending op to every client, shuffled and duplicated
    /// per the config, then clears the queue. Deterministic per seed.
    pub fn deliver_all(&mut self, clients: &mut [SimClient]) {
        if self.pending.is_empty() {
            return;
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut schedule = Vec::with_capacity(self.pending.len());
        for (i, op) in self.pending.drain(..).enumerate() {
            let at = if self.config.shuffle {
                rng.gen_range(0..=self.config.max_delay)
            } else {
                i as u64
            };
            let duplicate = if rng.gen::<f64>() < self.config.duplicate_prob {
                let spread = (self.config.max_delay * 2).max(1);
                let dup_at = self.config.max_delay + 1 + rng.gen_range(0..spread);
                Some(Delivery {
                    op: op.clone(),
                    at: dup_at,
                })
            } else {
                None
            };
            schedule.push(Delivery { op, at });
            if let Some(d) = duplicate {
                schedule.push(d);
            }
        }
        // Stable sort keeps equal ticks in queue order.
        schedule.sort_by_key(|d| d.at);
        for d in &schedule {
            for c in clients.iter_mut() {
                c.apply(&d.op);
            }
        }
    }
}
