//! Immutable result-window snapshot
//!
//! Published to listeners and safe to hold indefinitely: mutating the
//! subscription's live window never affects a snapshot already emitted.

use std::collections::HashMap;

use crate::query::range::QueryRange;
use crate::types::entity::Entity;

/// An immutable, paginated slice of a query's full result order
///
/// All offsets in the public API are absolute (global result-order
/// coordinates). The offset index is built once at construction.
#[derive(Debug, Clone)]
pub struct ResultWindow<E> {
    offset: usize,
    ids: Vec<String>,
    entities: HashMap<String, E>,
    index: HashMap<String, usize>,
}

impl<E: Entity> ResultWindow<E> {
    pub(crate) fn new(offset: usize, ids: Vec<String>, entities: HashMap<String, E>) -> Self {
        let index = ids
            .iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();
        ResultWindow {
            offset,
            ids,
            entities,
            index,
        }
    }

    pub fn empty() -> Self {
        ResultWindow::new(0, vec![], HashMap::new())
    }

    /// Absolute offset of the first id in the window
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The absolute range this window covers
    pub fn range(&self) -> QueryRange {
        QueryRange::new(self.offset, Some(self.ids.len()))
    }

    pub fn offset_of_id(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|position| self.offset + position)
    }

    pub fn id_at_offset(&self, offset: usize) -> Option<&str> {
        offset
            .checked_sub(self.offset)
            .and_then(|position| self.ids.get(position))
            .map(String::as_str)
    }

    pub fn entity_with_id(&self, id: &str) -> Option<&E> {
        self.entities.get(id)
    }

    pub fn entity_at_offset(&self, offset: usize) -> Option<&E> {
        self.id_at_offset(offset)
            .and_then(|id| self.entities.get(id))
    }

    /// True iff every id has a materialized entity
    pub fn is_complete(&self) -> bool {
        self.ids.iter().all(|id| self.entities.contains_key(id))
    }

    /// The window's entities flattened in result order
    ///
    /// Ids whose entity is not materialized are skipped.
    pub fn entities_in_order(&self) -> Vec<E> {
        self.ids
            .iter()
            .filter_map(|id| self.entities.get(id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::thread;

    #[test]
    fn test_lookups_use_absolute_offsets() {
        let a = thread("a", 300, "inbox");
        let b = thread("b", 200, "inbox");
        let entities = HashMap::from([("a".to_string(), a), ("b".to_string(), b)]);
        let window = ResultWindow::new(100, vec!["a".to_string(), "b".to_string()], entities);

        assert_eq!(window.range(), QueryRange::from_bounds(100, 102));
        assert_eq!(window.id_at_offset(101), Some("b"));
        assert_eq!(window.id_at_offset(99), None);
        assert_eq!(window.offset_of_id("b"), Some(101));
        assert_eq!(window.entity_at_offset(100).unwrap().id, "a");
        assert!(window.is_complete());
    }

    #[test]
    fn test_entities_in_order_skips_missing() {
        let a = thread("a", 300, "inbox");
        let entities = HashMap::from([("a".to_string(), a)]);
        let window = ResultWindow::new(0, vec!["a".to_string(), "b".to_string()], entities);

        assert!(!window.is_complete());
        let ordered = window.entities_in_order();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].id, "a");
    }
}
