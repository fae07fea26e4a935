//! Core data types shared across the library

pub mod change;
pub mod entity;
pub mod error;

pub use change::{ChangeRecord, ChangeType};
pub use entity::{Entity, ObjectClass, SortDescriptor, SortDirection, SortValue};
pub use error::{LiveQueryError, Result};
