//! # quill-core — sequence CRDT for collaborative text editing
//!
//! Implements a position-based list CRDT over variable-length integer paths.
//! Ordering is lexicographic (a shorter path sorts before any extension of
//! itself). Inserts pick a path strictly between two neighbors via
//! [`position::generate_between`]; when integer space runs out the path is
//! deepened with a digit derived from the caller's site bias, so concurrent
//! inserts into the same gap land on distinct, deterministic paths. Deletes
//! are tombstones. Merging is by position only; arrival order never changes
//! the outcome.
//!
//! Multiplayer undo is not local state rewind but a new distributed
//! operation: the client finds its last non-undone op, emits the inverse
//! (insert becomes delete at the same position, delete becomes re-insert)
//! and broadcasts it like any other edit. Tombstones are never removed, so
//! late joiners reconstruct identical state from the full op log.
//!
//! ## Modules
//!
//! - [`position`] — path order and `generate_between`
//! - [`engine`] — tombstoned element sequence with idempotent remote apply
//! - [`sim`] — deterministic chaos network for convergence testing

pub mod engine;
pub mod position;
pub mod sim;

pub use engine::{Element, Engine};
pub use position::{generate_between, Position, BASE};
