//! Property-based tests for the position algebra and engine convergence.

use proptest::prelude::*;
use quill_core::engine::Engine;
use quill_core::position::{generate_between, Position, BASE};

/// Arbitrary position: 1–4 digits, each in `[1, BASE)`. Digit zero is
/// reserved for paths the generator itself deepens through, and the left
/// sentinel; excluding it keeps generated pairs inside the sentinel range.
fn arb_position() -> impl Strategy<Value = Position> {
    prop::collection::vec(1u32..BASE, 1..=4).prop_map(Position)
}

/// An ordered pair of distinct positions.
fn arb_ordered_pair() -> impl Strategy<Value = (Position, Position)> {
    (arb_position(), arb_position())
        .prop_filter("positions must differ", |(a, b)| a != b)
        .prop_map(|(a, b)| if a < b { (a, b) } else { (b, a) })
}

proptest! {
    #[test]
    fn generated_position_is_strictly_between(
        (left, right) in arb_ordered_pair(),
        bias in 0i64..10_000,
    ) {
        let p = generate_between(&left, &right, bias);
        prop_assert!(left < p, "{left} !< {p}");
        prop_assert!(p < right, "{p} !< {right}");
    }

    #[test]
    fn generation_is_deterministic(
        (left, right) in arb_ordered_pair(),
        bias in 0i64..10_000,
    ) {
        let a = generate_between(&left, &right, bias);
        let b = generate_between(&left, &right, bias);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn depth_is_bounded((left, right) in arb_ordered_pair(), bias in 0i64..10_000) {
        let p = generate_between(&left, &right, bias);
        let bound = left.len().max(right.len()) + 1;
        prop_assert!(
            p.len() <= bound,
            "depth {} exceeds bound for {left} / {right}",
            p.len()
        );
    }

    #[test]
    fn distinct_biases_separate_when_gap_allows(base_digit in 1u32..(BASE - 2)) {
        // Adjacent digits force depth extension, where the bias digit
        // guarantees separation.
        let left = Position(vec![4, base_digit]);
        let right = Position(vec![4, base_digit + 1]);
        let p0 = generate_between(&left, &right, 0);
        let p1 = generate_between(&left, &right, 1);
        prop_assert_ne!(p0, p1);
    }

    #[test]
    fn apply_remote_commutes_over_permutations(
        values in prop::collection::vec(prop::char::range('a', 'z'), 2..8),
        seed in 0u64..1_000,
    ) {
        // Build a set of events through one replica, then apply them to two
        // fresh replicas in different orders (with a duplicate thrown in).
        let mut origin = Engine::new();
        let mut left = Position::first();
        let right = Position::last();
        let mut events = Vec::new();
        for (i, v) in values.iter().enumerate() {
            let el = origin.insert(&left, &right, *v, i as i64 * 37);
            left = el.position.clone();
            events.push((el.position, *v, false));
        }
        // Tombstone one of them.
        let victim = events[seed as usize % events.len()].0.clone();
        let victim_value = origin.element_at(&victim).unwrap().value;
        origin.delete(&victim);
        events.push((victim, victim_value, true));

        // Any causal permutation (a tombstone after its insert) converges;
        // here: insert order reversed, delete delivered last either way.
        let (inserts, deletes): (Vec<_>, Vec<_>) =
            events.iter().cloned().partition(|(_, _, del)| !del);
        let mut forward = Engine::new();
        for (pos, v, del) in inserts.iter().chain(deletes.iter()) {
            forward.apply_remote(pos, *v, *del);
        }
        let mut backward = Engine::new();
        for (pos, v, del) in inserts.iter().rev().chain(deletes.iter()) {
            backward.apply_remote(pos, *v, *del);
        }
        // Duplicate delivery must not change anything.
        let dup = &events[seed as usize % events.len()];
        backward.apply_remote(&dup.0, dup.1, dup.2);

        prop_assert_eq!(forward.text(), origin.text());
        prop_assert_eq!(backward.text(), origin.text());
    }

    #[test]
    fn apply_remote_is_idempotent(
        digits in prop::collection::vec(1u32..BASE, 1..=3),
        value in prop::char::range('a', 'z'),
    ) {
        let pos = Position(digits);
        let mut once = Engine::new();
        once.apply_remote(&pos, value, false);
        let mut twice = Engine::new();
        twice.apply_remote(&pos, value, false);
        twice.apply_remote(&pos, value, false);
        prop_assert_eq!(once.text(), twice.text());
        prop_assert_eq!(once.element_count(), twice.element_count());
    }

    #[test]
    fn tombstones_are_monotone(
        digits in prop::collection::vec(1u32..BASE, 1..=3),
        value in prop::char::range('a', 'z'),
    ) {
        let pos = Position(digits);
        let mut e = Engine::new();
        e.apply_remote(&pos, value, false);
        e.apply_remote(&pos, value, true);
        // Re-delivering the original insert never resurrects the element.
        e.apply_remote(&pos, value, false);
        prop_assert!(!e.text().contains(value));
    }
}
