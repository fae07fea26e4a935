//! Entity model and sort capabilities
//!
//! Entities are the rows a query returns. The library never inspects
//! entity fields directly; instead each entity type declares an explicit
//! sort capability (`sort_value`) so reconciliation can compare items
//! under a query's sort descriptors without reflective field access.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a store entity class (e.g. "Thread", "Message")
///
/// Used to route change records to the subscriptions that care about them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectClass(Cow<'static, str>);

impl ObjectClass {
    pub const fn from_static(name: &'static str) -> Self {
        ObjectClass(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        ObjectClass(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A row-level store entity
///
/// Identifiers must be stable across writes; `account_id` is the optional
/// partition key typically present on mail data.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Stable identifier, unique within the object class
    fn id(&self) -> &str;

    /// Optional partition key
    fn account_id(&self) -> Option<&str> {
        None
    }

    /// The store class this entity belongs to
    fn object_class(&self) -> ObjectClass;

    /// The sortable value of this entity under the given sort key
    ///
    /// Unknown keys should return [`SortValue::Null`].
    fn sort_value(&self, key: &str) -> SortValue;
}

/// A single sortable value extracted from an entity
///
/// Numeric variants compare across `Int`/`Float` so that equal values of
/// different representations are treated as unchanged. Unrelated variants
/// are incomparable (`partial_cmp` returns `None`), which reconciliation
/// must treat as a sort-order change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SortValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Text(String),
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use SortValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Time(a), Time(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Sort direction of a single descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One element of a query's ORDER BY clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDescriptor {
    /// Sort key, resolved through [`Entity::sort_value`]
    pub key: String,
    pub direction: SortDirection,
}

impl SortDescriptor {
    pub fn asc(key: impl Into<String>) -> Self {
        SortDescriptor {
            key: key.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        SortDescriptor {
            key: key.into(),
            direction: SortDirection::Desc,
        }
    }
}
