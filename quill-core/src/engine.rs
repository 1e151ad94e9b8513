//! Tombstoned element sequence keyed by position.
//!
//! The engine keeps every element it has ever seen, live or deleted, sorted
//! by position. Remote application is an idempotent upsert, so replicas that
//! observe the same multiset of operations render the same text regardless
//! of arrival order or duplication.

use crate::position::{generate_between, Position, BASE};

/// One unit of the sequence: a code point at a position, possibly tombstoned.
///
/// A tombstone is monotone: `deleted` only ever flips from `false` to `true`
/// and the element is never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub position: Position,
    pub value: char,
    pub deleted: bool,
}

/// Ordered collection of elements (live and tombstoned), bracketed by the
/// two sentinel tombstones `[0]` and `[BASE - 1]`.
#[derive(Debug, Clone)]
pub struct Engine {
    elements: Vec<Element>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An empty document: just the two boundary tombstones.
    pub fn new() -> Self {
        Engine {
            elements: vec![
                Element {
                    position: Position(vec![0]),
                    value: '\0',
                    deleted: true,
                },
                Element {
                    position: Position(vec![BASE - 1]),
                    value: '\0',
                    deleted: true,
                },
            ],
        }
    }

    fn index_of(&self, pos: &Position) -> Option<usize> {
        self.elements
            .binary_search_by(|el| el.position.cmp(pos))
            .ok()
    }

    fn insert_element(&mut self, el: Element) {
        match self.elements.binary_search_by(|e| e.position.cmp(&el.position)) {
            Ok(_) => {} // duplicate position, first writer wins
            Err(at) => self.elements.insert(at, el),
        }
    }

    /// Inserts `value` between the two existing neighbor positions and
    /// returns the stored element. `site_bias` disambiguates concurrent
    /// inserts into the same gap.
    pub fn insert(
        &mut self,
        left: &Position,
        right: &Position,
        value: char,
        site_bias: i64,
    ) -> Element {
        let position = generate_between(left, right, site_bias);
        let el = Element {
            position,
            value,
            deleted: false,
        };
        self.insert_element(el.clone());
        el
    }

    /// Marks the element at `pos` deleted. Unknown positions are ignored.
    pub fn delete(&mut self, pos: &Position) {
        if let Some(i) = self.index_of(pos) {
            self.elements[i].deleted = true;
        }
    }

    /// Applies a remote insert or delete. Idempotent: a known position only
    /// ever gains a tombstone (never loses one), and a delete for an unknown
    /// position is dropped rather than creating a pre-tombstoned element.
    pub fn apply_remote(&mut self, pos: &Position, value: char, deleted: bool) {
        if let Some(i) = self.index_of(pos) {
            if deleted {
                self.elements[i].deleted = true;
            }
            return;
        }
        if deleted {
            return;
        }
        self.insert_element(Element {
            position: pos.clone(),
            value,
            deleted: false,
        });
    }

    /// The visible document: live values in position order.
    pub fn text(&self) -> String {
        self.elements
            .iter()
            .filter(|el| !el.deleted)
            .map(|el| el.value)
            .collect()
    }

    /// Positions of the live elements, in order.
    pub fn positions(&self) -> Vec<Position> {
        self.elements
            .iter()
            .filter(|el| !el.deleted)
            .map(|el| el.position.clone())
            .collect()
    }

    /// Looks up the element stored at `pos`.
    pub fn element_at(&self, pos: &Position) -> Option<&Element> {
        self.index_of(pos).map(|i| &self.elements[i])
    }

    /// Nearest live position strictly before `pos`, if any.
    pub fn left_neighbor(&self, pos: &Position) -> Option<Position> {
        let idx = self.index_of(pos)?;
        self.elements[..idx]
            .iter()
            .rev()
            .find(|el| !el.deleted)
            .map(|el| el.position.clone())
    }

    /// Nearest live position strictly after `pos`, if any.
    pub fn right_neighbor(&self, pos: &Position) -> Option<Position> {
        let idx = self.index_of(pos)?;
        self.elements[idx + 1..]
            .iter()
            .find(|el| !el.deleted)
            .map(|el| el.position.clone())
    }

    /// Number of stored elements, tombstones and sentinels included.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> (Position, Position) {
        (Position::first(), Position::last())
    }

    #[test]
    fn test_empty_engine_renders_nothing() {
        let e = Engine::new();
        assert_eq!(e.text(), "");
        assert_eq!(e.element_count(), 2);
    }

    #[test]
    fn test_insert_renders_in_order() {
        let (left, right) = bounds();
        let mut e = Engine::new();
        let a = e.insert(&left, &right, 'a', 0);
        let b = e.insert(&a.position, &right, 'b', 0);
        e.insert(&b.position, &right, 'c', 0);
        assert_eq!(e.text(), "abc");
    }

    #[test]
    fn test_delete_is_tombstone_not_removal() {
        let (left, right) = bounds();
        let mut e = Engine::new();
        e.insert(&left, &right, 'a', 0);
        let pos = e.positions();
        e.insert(&pos[0], &right, 'b', 0);
        let pos = e.positions();
        assert_eq!(pos.len(), 2);
        e.delete(&pos[0]);
        assert_eq!(e.text(), "b");
        // The element is still there, just dead.
        assert!(e.element_at(&pos[0]).unwrap().deleted);
    }

    #[test]
    fn test_apply_remote_insert_then_duplicate() {
        let mut e = Engine::new();
        let pos = Position(vec![100]);
        e.apply_remote(&pos, 'x', false);
        e.apply_remote(&pos, 'x', false);
        assert_eq!(e.text(), "x");
        assert_eq!(e.element_count(), 3);
    }

    #[test]
    fn test_apply_remote_delete_unknown_is_noop() {
        let mut e = Engine::new();
        e.apply_remote(&Position(vec![100]), 'x', true);
        assert_eq!(e.element_count(), 2);
        // A later insert at the same position still lands.
        e.apply_remote(&Position(vec![100]), 'x', false);
        assert_eq!(e.text(), "x");
    }

    #[test]
    fn test_tombstone_never_resurrects() {
        let mut e = Engine::new();
        let pos = Position(vec![100]);
        e.apply_remote(&pos, 'x', false);
        e.apply_remote(&pos, 'x', true);
        e.apply_remote(&pos, 'x', false);
        assert_eq!(e.text(), "");
    }

    #[test]
    fn test_neighbors_skip_tombstones() {
        let (left, right) = bounds();
        let mut e = Engine::new();
        e.insert(&left, &right, 'a', 0);
        let p = e.positions();
        e.insert(&p[0], &right, 'b', 0);
        let p = e.positions();
        e.insert(&p[1], &right, 'c', 0);
        let p = e.positions();
        let (pa, pb, pc) = (p[0].clone(), p[1].clone(), p[2].clone());
        e.delete(&pb);
        assert_eq!(e.left_neighbor(&pc), Some(pa.clone()));
        assert_eq!(e.right_neighbor(&pa), Some(pc));
        assert_eq!(e.left_neighbor(&pa), None);
    }

    #[test]
    fn test_convergence_three_sites_any_order() {
        let (left, right) = bounds();
        let build = |xy_swapped: bool| {
            let mut e = Engine::new();
            e.insert(&left, &right, 'A', 0);
            let pos = e.positions();
            let pa = pos[0].clone();
            e.insert(&pa, &right, 'B', 0);
            let pos = e.positions();
            let (pa, pb) = (pos[0].clone(), pos[1].clone());
            if xy_swapped {
                e.insert(&pa, &pb, 'Y', 200);
                e.insert(&pa, &pb, 'X', 100);
            } else {
                e.insert(&pa, &pb, 'X', 100);
                e.insert(&pa, &pb, 'Y', 200);
            }
            e.text()
        };
        let s1 = build(false);
        let s2 = build(true);
        assert_eq!(s1, s2, "replicas must converge");
        assert_eq!(s1.len(), 4);
    }
}
