//! Backing store seam
//!
//! The persistent store is an external collaborator. It must run queries,
//! materialize entities by id, and emit exactly one change record after
//! every successful write. All I/O is async; change records arrive over a
//! flume channel that the pool drains on a background task.

use async_trait::async_trait;

use crate::query::descriptor::ModelQuery;
use crate::types::change::ChangeRecord;
use crate::types::entity::{Entity, ObjectClass};
use crate::types::error::Result;

/// Shape of the rows a query run should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    /// Fully materialized entities
    Entities,
    /// Identifiers only; entities are fetched later via `find_all`
    Ids,
}

/// Rows returned by [`Store::run`], matching the requested format
#[derive(Debug, Clone)]
pub enum FetchResults<E> {
    Entities(Vec<E>),
    Ids(Vec<String>),
}

/// The persistent store the subscriptions read from
///
/// Contract: `run` honors the range embedded in the query it receives,
/// and every successful write is eventually followed by exactly one
/// change record describing it.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Entity: Entity;
    type Query: ModelQuery<Entity = Self::Entity>;

    /// Run the query and return the rows in its range
    async fn run(
        &self,
        query: &Self::Query,
        format: ResultFormat,
    ) -> Result<FetchResults<Self::Entity>>;

    /// Materialize entities by id, in no particular order
    async fn find_all(
        &self,
        object_class: ObjectClass,
        ids: &[String],
    ) -> Result<Vec<Self::Entity>>;

    /// The store's global stream of change records
    fn change_stream(&self) -> flume::Receiver<ChangeRecord<Self::Entity>>;
}
