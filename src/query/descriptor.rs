//! Query descriptor seam
//!
//! The query language and matcher objects live outside this library. A
//! query only needs to expose the operations the subscription machinery
//! relies on: a canonical signature for deduplication, a membership
//! predicate, sort descriptors, and range manipulation.

use serde::{Deserialize, Serialize};

use crate::query::range::QueryRange;
use crate::types::entity::{Entity, ObjectClass, SortDescriptor};

/// A finalized, immutable query over one entity class
///
/// Implementations own the filter predicates; this library never inspects
/// them beyond the methods below.
pub trait ModelQuery: Clone + Send + Sync + 'static {
    type Entity: Entity;

    /// Canonical string over (object class, filter predicates, sort order),
    /// excluding range/pagination
    ///
    /// Two queries with the same signature must produce the same
    /// unpaginated result order. Used as the pool's dedup key.
    fn signature(&self) -> String;

    fn object_class(&self) -> ObjectClass;

    fn range(&self) -> QueryRange;

    /// An independent copy of this query with the range replaced
    ///
    /// Must never mutate the original.
    fn with_range(&self, range: QueryRange) -> Self;

    /// True iff the entity belongs to this query's result set
    fn matches(&self, entity: &Self::Entity) -> bool;

    fn sort_descriptors(&self) -> &[SortDescriptor];

    /// Count/aggregate queries cannot be subscribed to
    fn is_aggregate(&self) -> bool {
        false
    }

    /// Declares that this is a list query over a category, enabling
    /// optimistic removal of pending category writes
    fn category_filter(&self) -> Option<&CategoryFilter> {
        None
    }
}

/// Category membership predicate of a list query
///
/// The typed surface the pool pattern-matches against when deciding
/// whether a pending write is a pure removal from the viewed category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CategoryFilter {
    /// Entity must be in this exact category
    Contains { category_id: String },
    /// Entity must be in at least one of these categories
    ContainsAny { category_ids: Vec<String> },
}

impl CategoryFilter {
    pub fn contains(category_id: impl Into<String>) -> Self {
        CategoryFilter::Contains {
            category_id: category_id.into(),
        }
    }

    pub fn contains_any(category_ids: Vec<String>) -> Self {
        CategoryFilter::ContainsAny { category_ids }
    }

    /// True iff this filter would match entities in the given category
    pub fn matches_category(&self, category_id: &str) -> bool {
        match self {
            CategoryFilter::Contains { category_id: id } => id == category_id,
            CategoryFilter::ContainsAny { category_ids } => {
                category_ids.iter().any(|id| id == category_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_matches_single_category() {
        let filter = CategoryFilter::contains("inbox");
        assert!(filter.matches_category("inbox"));
        assert!(!filter.matches_category("archive"));
    }

    #[test]
    fn test_contains_any_matches_each_category() {
        let filter =
            CategoryFilter::contains_any(vec!["inbox".to_string(), "important".to_string()]);
        assert!(filter.matches_category("inbox"));
        assert!(filter.matches_category("important"));
        assert!(!filter.matches_category("spam"));
    }
}
