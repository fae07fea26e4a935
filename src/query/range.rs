//! Range over an ordered result sequence
//!
//! A range describes `[offset, offset + limit)` of a query's full result
//! order. `limit: None` is the infinite sentinel (no pagination). The set
//! algebra here is what lets a subscription fetch only the slice of a
//! window it does not already have.

use serde::{Deserialize, Serialize};

/// A `[offset, offset + limit)` slice of an ordered result sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    offset: usize,
    /// `None` means unbounded (no pagination)
    limit: Option<usize>,
}

impl QueryRange {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        QueryRange { offset, limit }
    }

    /// The unpaginated range covering the whole result order
    pub fn infinite() -> Self {
        QueryRange {
            offset: 0,
            limit: None,
        }
    }

    /// Half-open `[start, end)` constructor
    pub fn from_bounds(start: usize, end: usize) -> Self {
        QueryRange {
            offset: start,
            limit: Some(end.saturating_sub(start)),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn start(&self) -> usize {
        self.offset
    }

    /// Exclusive end, `None` iff the range is infinite
    pub fn end(&self) -> Option<usize> {
        self.limit.map(|limit| self.offset.saturating_add(limit))
    }

    pub fn is_infinite(&self) -> bool {
        self.limit.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.limit == Some(0)
    }

    /// The portions of `self` not covered by `bounds`
    ///
    /// Returns 0, 1, or 2 disjoint non-empty pieces. If `bounds` is
    /// infinite everything is covered; if `self` is infinite (and `bounds`
    /// is not) subtraction is not attempted and the whole of `self` is
    /// returned as still needed.
    pub fn subtract(&self, bounds: &QueryRange) -> Vec<QueryRange> {
        if bounds.is_infinite() {
            return vec![];
        }
        if self.is_infinite() {
            return vec![*self];
        }

        let self_end = self.end().unwrap_or(usize::MAX);
        let bounds_end = bounds.end().unwrap_or(usize::MAX);

        let mut pieces = vec![];
        if bounds.offset > self.offset {
            let left = QueryRange::from_bounds(self.offset, bounds.offset.min(self_end));
            if !left.is_empty() {
                pieces.push(left);
            }
        }
        if bounds_end < self_end {
            let right = QueryRange::from_bounds(bounds_end.max(self.offset), self_end);
            if !right.is_empty() {
                pieces.push(right);
            }
        }
        pieces
    }

    /// True iff the ranges overlap or abut
    ///
    /// Any infinite operand is contiguous with everything.
    pub fn is_contiguous_with(&self, other: &QueryRange) -> bool {
        if self.is_infinite() || other.is_infinite() {
            return true;
        }
        let self_end = self.end().unwrap_or(usize::MAX);
        let other_end = other.end().unwrap_or(usize::MAX);
        self.offset <= other_end && other.offset <= self_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_disjoint_returns_self() {
        let a = QueryRange::from_bounds(0, 10);
        let b = QueryRange::from_bounds(20, 30);
        assert_eq!(a.subtract(&b), vec![a]);
        assert_eq!(b.subtract(&a), vec![b]);
    }

    #[test]
    fn test_subtract_superset_returns_empty() {
        let a = QueryRange::from_bounds(5, 10);
        let b = QueryRange::from_bounds(0, 20);
        assert!(a.subtract(&b).is_empty());
        assert!(a.subtract(&a).is_empty());
    }

    #[test]
    fn test_subtract_overlap_returns_one_piece() {
        // Window grew downward: [100, 150) minus [120, 170) leaves the head
        let a = QueryRange::from_bounds(100, 150);
        let b = QueryRange::from_bounds(120, 170);
        assert_eq!(a.subtract(&b), vec![QueryRange::from_bounds(100, 120)]);

        // Scrolled forward: [120, 170) minus [100, 150) leaves the tail
        assert_eq!(b.subtract(&a), vec![QueryRange::from_bounds(150, 170)]);
    }

    #[test]
    fn test_subtract_strict_subset_returns_two_pieces() {
        let a = QueryRange::from_bounds(0, 100);
        let b = QueryRange::from_bounds(40, 60);
        assert_eq!(
            a.subtract(&b),
            vec![
                QueryRange::from_bounds(0, 40),
                QueryRange::from_bounds(60, 100)
            ]
        );
    }

    #[test]
    fn test_subtract_infinite_handling() {
        let finite = QueryRange::from_bounds(10, 20);
        let infinite = QueryRange::infinite();
        assert!(finite.subtract(&infinite).is_empty());
        assert_eq!(infinite.subtract(&finite), vec![infinite]);
    }

    #[test]
    fn test_contiguity() {
        let a = QueryRange::from_bounds(0, 10);
        assert!(a.is_contiguous_with(&QueryRange::from_bounds(10, 20)));
        assert!(a.is_contiguous_with(&QueryRange::from_bounds(5, 15)));
        assert!(!a.is_contiguous_with(&QueryRange::from_bounds(11, 20)));
        assert!(a.is_contiguous_with(&QueryRange::infinite()));
    }

    #[test]
    fn test_equality_ignores_identity() {
        assert_eq!(QueryRange::new(5, Some(10)), QueryRange::from_bounds(5, 15));
        assert_ne!(QueryRange::new(5, Some(10)), QueryRange::new(5, None));
    }

    #[test]
    fn test_end_saturates() {
        let range = QueryRange::new(usize::MAX, Some(10));
        assert_eq!(range.end(), Some(usize::MAX));
    }
}
