//! Subscription whose query can be swapped at runtime
//!
//! Covers the two UI flows that change a live query: the visible range
//! scrolls (window is reused, only the delta is fetched) and the filter
//! or sort changes (window is discarded, full fetch).

use std::sync::Arc;

use crate::query::descriptor::ModelQuery;
use crate::query::range::QueryRange;
use crate::store::Store;
use crate::subscription::{CallbackId, QueryUpdate, Subscription, SubscriptionOptions};
use crate::types::error::{LiveQueryError, Result};

/// A [`Subscription`] with a replaceable query descriptor
pub struct MutableSubscription<S: Store> {
    inner: Arc<Subscription<S>>,
}

impl<S: Store> MutableSubscription<S> {
    pub fn new(
        store: Arc<S>,
        query: S::Query,
        options: SubscriptionOptions<S::Entity>,
    ) -> Result<Self> {
        Ok(MutableSubscription {
            inner: Subscription::new(store, query, options)?,
        })
    }

    /// The underlying subscription, e.g. for registering it in a pool
    /// under a private key
    pub fn subscription(&self) -> Arc<Subscription<S>> {
        Arc::clone(&self.inner)
    }

    pub fn add_callback(
        &self,
        callback: impl Fn(QueryUpdate<S::Entity>) + Send + Sync + 'static,
    ) -> CallbackId {
        self.inner.add_callback(callback)
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.inner.remove_callback(id)
    }

    pub fn query(&self) -> S::Query {
        self.inner.query()
    }

    /// Swap the query atomically
    ///
    /// No-op when signature and range both match the current query. When
    /// only the range changed the cached window is preserved and just the
    /// range delta is fetched; a filter or sort change discards the
    /// window and issues a full fetch. Any in-flight fetch for the old
    /// query is discarded on arrival.
    pub fn replace_query(&self, next: S::Query) -> Result<()> {
        if next.is_aggregate() {
            return Err(LiveQueryError::AggregateQuery(next.signature()));
        }
        if self.inner.swap_query(next) {
            self.inner.spawn_update(false);
        }
        Ok(())
    }

    /// Sugar over [`replace_query`](Self::replace_query) for the common
    /// "user scrolled" case; short-circuits when the range is unchanged
    pub fn replace_range(&self, start: usize, end: usize) -> Result<()> {
        let query = self.inner.query();
        let range = QueryRange::from_bounds(start, end);
        if query.range() == range {
            return Ok(());
        }
        self.replace_query(query.with_range(range))
    }
}
