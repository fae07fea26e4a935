//! Change records emitted by the backing store
//!
//! The store emits exactly one change record after every successful write.
//! Records are consumed as immutable input; this library never produces
//! them.

use serde::{Deserialize, Serialize};

use crate::types::entity::{Entity, ObjectClass};

/// Kind of write the store performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Entities were created or updated
    Persist,
    /// Entities were deleted
    Unpersist,
}

/// Notification describing entities written to or removed from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord<E> {
    pub change: ChangeType,
    pub object_class: ObjectClass,
    pub objects: Vec<E>,
}

impl<E: Entity> ChangeRecord<E> {
    pub fn persist(object_class: ObjectClass, objects: Vec<E>) -> Self {
        ChangeRecord {
            change: ChangeType::Persist,
            object_class,
            objects,
        }
    }

    pub fn unpersist(object_class: ObjectClass, objects: Vec<E>) -> Self {
        ChangeRecord {
            change: ChangeType::Unpersist,
            object_class,
            objects,
        }
    }
}
