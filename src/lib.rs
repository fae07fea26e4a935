//! Live query subscriptions over a local database cache
//!
//! UI code declares "I want results N..M of query Q, kept continuously up
//! to date" and receives a consistent, deduplicated, incrementally
//! maintained view of the data without the full query re-running on every
//! change.
//!
//! Features:
//! - Windowed pagination over potentially unbounded result sets
//! - Incremental reconciliation against the store's change records, with
//!   a fallback to a full refetch whenever a patch cannot be proven sound
//! - Process-wide subscription deduplication by query signature
//! - Optimistic removal of entities affected by pending category writes
//!
//! ## Module Organization
//!
//! - `types/`: entities, change records, errors
//! - `query/`: query descriptor seam and range algebra
//! - `store/`: backing-store seam
//! - `window/`: immutable and mutable result windows
//! - `subscription/`: the live subscription and its mutable variant
//! - `pool/`: the process-wide subscription registry
//! - `tasks`: pending-write notifications for optimistic removal
//!
//! The backing store, the query language, and the write-task queue are
//! external collaborators; this crate only depends on the seams in
//! `store/`, `query/`, and `tasks`. Constructors that spawn background
//! fetches require an ambient tokio runtime.

pub mod pool;
pub mod query;
pub mod store;
pub mod subscription;
pub mod tasks;
pub mod types;
pub mod window;

#[cfg(test)]
pub(crate) mod testkit;

pub use pool::{PoolConfig, SubscriptionPool, Unsubscriber};
pub use query::{CategoryFilter, ModelQuery, QueryRange};
pub use store::{FetchResults, ResultFormat, Store};
pub use subscription::{
    CallbackId, MutableSubscription, QueryUpdate, Subscription, SubscriptionOptions,
};
pub use tasks::{MutationIntent, PendingWrite};
pub use types::{
    ChangeRecord, ChangeType, Entity, LiveQueryError, ObjectClass, Result, SortDescriptor,
    SortDirection, SortValue,
};
