//! Deterministic chaos harness for convergence testing.
//!
//! [`SimClient`] is a client-side replica: it produces ops with fresh op
//! ids, keeps an op log for late-join replay, and implements undo as an
//! inverse operation. [`ChaosNetwork`] is the delivery fabric between
//! replicas: seeded random delay, duplication and reordering, so every
//! failure found here replays from its seed.

mod client;
mod network;

pub use client::SimClient;
pub use network::{ChaosConfig, ChaosNetwork, SimOp, SimOpId};
