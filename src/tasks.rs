//! Pending-write notifications for optimistic removal
//!
//! The write-task/undo queue lives outside this library; callers only
//! notify the pool when a speculative write is enqueued. Tasks declare
//! their category effect explicitly as a mutation intent rather than the
//! pool pattern-matching on task internals.

use serde::{Deserialize, Serialize};

use crate::query::descriptor::ModelQuery;
use crate::types::entity::ObjectClass;

/// Category effect of a queued write task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MutationIntent {
    /// Items gain a category
    CategoryAdd { category_id: String },
    /// Items lose categories without gaining any
    CategoryRemove { category_ids: Vec<String> },
    /// Items move from one category to another
    CategoryMove {
        from_category_id: String,
        to_category_id: String,
    },
}

/// A locally-enqueued write, not yet confirmed by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub object_class: ObjectClass,
    /// Ids of the entities the task affects
    pub ids: Vec<String>,
    pub intent: MutationIntent,
    /// Undo tasks must not re-apply speculation
    pub is_undo: bool,
}

impl PendingWrite {
    /// The ids to speculatively remove from a subscription viewing `query`,
    /// if this write is a pure removal from the viewed category
    ///
    /// Returns `None` for undo tasks, class mismatches, queries without a
    /// category filter, additions, and moves within the viewed category.
    pub fn removal_ids<Q: ModelQuery>(&self, query: &Q) -> Option<&[String]> {
        if self.is_undo || self.ids.is_empty() || self.object_class != query.object_class() {
            return None;
        }
        let filter = query.category_filter()?;

        let removes_from_view = match &self.intent {
            MutationIntent::CategoryAdd { .. } => false,
            MutationIntent::CategoryRemove { category_ids } => category_ids
                .iter()
                .any(|category_id| filter.matches_category(category_id)),
            MutationIntent::CategoryMove {
                from_category_id,
                to_category_id,
            } => {
                filter.matches_category(from_category_id)
                    && !filter.matches_category(to_category_id)
            }
        };

        if removes_from_view {
            Some(&self.ids)
        } else {
            None
        }
    }
}
