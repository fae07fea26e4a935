//! Mutable result window
//!
//! The working window a subscription patches in place as fetches land and
//! change records are reconciled. Supports partial completeness: ids can
//! be known before their entities are materialized.

use std::collections::{HashMap, HashSet};

use crate::query::range::QueryRange;
use crate::types::entity::Entity;
use crate::types::error::{LiveQueryError, Result};
use crate::window::result_window::ResultWindow;

/// The ordered ids visible in the current window plus a lookup table of
/// materialized entities
///
/// All offsets in the public API are absolute. `offset == None` means no
/// data has been added yet. The structure never dedups ids; duplicates
/// indicate an upstream consistency bug and are detected at publish time.
#[derive(Debug, Clone)]
pub struct MutableResultWindow<E> {
    offset: Option<usize>,
    ids: Vec<String>,
    entities: HashMap<String, E>,
    /// id -> position within `ids`, built lazily, dropped on every id change
    index: Option<HashMap<String, usize>>,
}

impl<E: Entity> MutableResultWindow<E> {
    pub fn new() -> Self {
        MutableResultWindow {
            offset: None,
            ids: vec![],
            entities: HashMap::new(),
            index: None,
        }
    }

    /// Absolute offset of the first id, `None` before any data is added
    pub fn offset(&self) -> Option<usize> {
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

    /// Number of materialized entities (may lag behind `len`)
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The absolute range currently covered
    pub fn range(&self) -> QueryRange {
        QueryRange::new(self.offset.unwrap_or(0), Some(self.ids.len()))
    }

    pub fn offset_of_id(&mut self, id: &str) -> Option<usize> {
        let offset = self.offset?;
        if self.index.is_none() {
            self.index = Some(
                self.ids
                    .iter()
                    .enumerate()
                    .map(|(position, id)| (id.clone(), position))
                    .collect(),
            );
        }
        self.index
            .as_ref()
            .and_then(|index| index.get(id))
            .map(|position| offset + position)
    }

    pub fn id_at_offset(&self, offset: usize) -> Option<&str> {
        let base = self.offset?;
        offset
            .checked_sub(base)
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

    /// Splice a fetched run of ids into the window
    ///
    /// An empty window or an infinite range replaces the contents
    /// wholesale. Otherwise the range must intersect or abut the current
    /// one. The existing tail past the new ids is kept only when the fetch
    /// came back full; a short fetch means the store ran out of rows and
    /// anything previously cached beyond it is invalid.
    pub fn add_ids_in_range(&mut self, new_ids: Vec<String>, range: QueryRange) -> Result<()> {
        let current_start = match self.offset {
            Some(offset) if !range.is_infinite() => offset,
            _ => {
                self.ids = new_ids;
                self.offset = Some(range.offset());
                self.index = None;
                return Ok(());
            }
        };

        let current_end = current_start + self.ids.len();
        let range_end = range.offset().saturating_add(new_ids.len());
        if range.offset() > current_end || range_end < current_start {
            return Err(LiveQueryError::WindowRange(format!(
                "Range [{}, {}) is not contiguous with the window range [{}, {})",
                range.offset(),
                range_end,
                current_start,
                current_end,
            )));
        }

        let fetch_was_full = range
            .limit()
            .map_or(false, |limit| new_ids.len() >= limit);

        let mut merged = Vec::with_capacity(self.ids.len() + new_ids.len());
        if range.offset() > current_start {
            merged.extend_from_slice(&self.ids[..range.offset() - current_start]);
        }
        merged.extend(new_ids);
        if fetch_was_full && current_end > range_end {
            merged.extend_from_slice(&self.ids[range_end - current_start..]);
        }

        self.ids = merged;
        self.offset = Some(current_start.min(range.offset()));
        self.index = None;
        Ok(())
    }

    /// Splice fetched entities into the window, overwriting the
    /// overlapping slice
    pub fn add_entities_in_range(&mut self, entities: Vec<E>, range: QueryRange) -> Result<()> {
        let ids = entities
            .iter()
            .map(|entity| entity.id().to_string())
            .collect();
        self.add_ids_in_range(ids, range)?;
        for entity in entities {
            self.entities.insert(entity.id().to_string(), entity);
        }
        Ok(())
    }

    /// Replace an entity in place if its id is present, else no-op
    ///
    /// Membership is decided by the caller; this never adds ids.
    pub fn update_entity(&mut self, entity: E) {
        if self.offset_of_id(entity.id()).is_some() {
            self.entities.insert(entity.id().to_string(), entity);
        }
    }

    /// Splice out the id at the given absolute offset
    ///
    /// Errors if the offset is outside the window or holds a different id,
    /// which would indicate a store-consistency bug.
    pub fn remove_entity_at_offset(&mut self, id: &str, offset: usize) -> Result<()> {
        let position = self
            .offset
            .and_then(|base| offset.checked_sub(base))
            .filter(|position| self.ids.get(*position).map(String::as_str) == Some(id))
            .ok_or_else(|| {
                LiveQueryError::WindowRange(format!(
                    "Cannot remove {}: offset {} is not within the window",
                    id, offset
                ))
            })?;

        self.ids.remove(position);
        self.entities.remove(id);
        self.index = None;
        Ok(())
    }

    /// Trim the window to the query's desired bounds
    ///
    /// Also drops entities for the discarded ids so the cache cannot grow
    /// without bound as changes are patched in.
    pub fn clip_to_range(&mut self, range: QueryRange) {
        if range.is_infinite() {
            return;
        }
        let current_start = match self.offset {
            Some(offset) => offset,
            None => return,
        };

        if range.offset() > current_start {
            let drop = (range.offset() - current_start).min(self.ids.len());
            self.ids.drain(..drop);
            self.offset = Some(range.offset());
        }
        if let Some(end) = range.end() {
            let start = self.offset.unwrap_or(0);
            self.ids.truncate(end.saturating_sub(start));
        }

        let kept: HashSet<&String> = self.ids.iter().collect();
        self.entities.retain(|id, _| kept.contains(id));
        self.index = None;
    }

    /// A deep-enough snapshot: mutating `self` afterwards never affects
    /// the returned window
    pub fn immutable_clone(&self) -> ResultWindow<E> {
        ResultWindow::new(
            self.offset.unwrap_or(0),
            self.ids.clone(),
            self.entities.clone(),
        )
    }

    /// The window's entities flattened in result order, skipping ids whose
    /// entity is not materialized
    pub fn entities_in_order(&self) -> Vec<E> {
        self.ids
            .iter()
            .filter_map(|id| self.entities.get(id))
            .cloned()
            .collect()
    }
}

impl<E: Entity> Default for MutableResultWindow<E> {
    fn default() -> Self {
        MutableResultWindow::new()
    }
}
