//! Live query subscription
//!
//! A subscription owns one query and one result window, keeps the window
//! continuously up to date against the store's change records, and
//! notifies registered callbacks with each new result.
//!
//! Incremental patching is an optimization that is abandoned whenever it
//! cannot be proven locally sound: any change whose effect on window
//! order or membership is ambiguous forces a full refetch of the query's
//! range.

pub mod mutable;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::query::descriptor::ModelQuery;
use crate::query::range::QueryRange;
use crate::store::{FetchResults, ResultFormat, Store};
use crate::types::change::{ChangeRecord, ChangeType};
use crate::types::entity::{Entity, SortDirection, SortValue};
use crate::types::error::{LiveQueryError, Result};
use crate::window::mutable::MutableResultWindow;
use crate::window::result_window::ResultWindow;

pub use mutable::MutableSubscription;

/// Handle identifying a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Payload delivered to subscription callbacks
///
/// Listeners receive either an immutable window snapshot or a flattened,
/// ordered entity array, per [`SubscriptionOptions::emit_window`]. Both
/// are safe to hold indefinitely.
#[derive(Debug, Clone)]
pub enum QueryUpdate<E> {
    Window(Arc<ResultWindow<E>>),
    Entities(Arc<Vec<E>>),
}

impl<E: Entity> QueryUpdate<E> {
    pub fn len(&self) -> usize {
        match self {
            QueryUpdate::Window(window) => window.len(),
            QueryUpdate::Entities(entities) => entities.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_window(&self) -> Option<&ResultWindow<E>> {
        match self {
            QueryUpdate::Window(window) => Some(window),
            QueryUpdate::Entities(_) => None,
        }
    }

    pub fn as_entities(&self) -> Option<&[E]> {
        match self {
            QueryUpdate::Window(_) => None,
            QueryUpdate::Entities(entities) => Some(entities),
        }
    }
}

/// Subscription construction options
pub struct SubscriptionOptions<E> {
    /// Deliver window snapshots instead of flattened entity arrays
    pub emit_window: bool,
    /// Pre-fill the window at offset 0 and publish immediately instead of
    /// issuing the initial fetch
    pub initial_entities: Option<Vec<E>>,
    /// Minimum seconds between forced refetches after a store-consistency
    /// violation is detected at publish time
    pub recovery_interval_secs: u64,
}

impl<E> Default for SubscriptionOptions<E> {
    fn default() -> Self {
        Self {
            emit_window: false,
            initial_entities: None,
            recovery_interval_secs: 30,
        }
    }
}

type Callback<E> = Arc<dyn Fn(QueryUpdate<E>) + Send + Sync>;

struct SubscriptionState<S: Store> {
    query: S::Query,
    window: Option<MutableResultWindow<S::Entity>>,
    callbacks: Vec<(CallbackId, Callback<S::Entity>)>,
    next_callback_id: u64,
    /// The last published payload; `None` only before the first publish
    last_result: Option<QueryUpdate<S::Entity>>,
    queued_records: Vec<ChangeRecord<S::Entity>>,
    /// Bumped to discard in-flight fetch results; fetches are never
    /// cancelled at the I/O layer
    query_version: u64,
    updates_in_flight: u32,
    last_recovery: Option<Instant>,
}

/// Everything needed to notify listeners, assembled under the lock and
/// delivered outside it
struct Publish<E: Entity> {
    payload: QueryUpdate<E>,
    callbacks: Vec<Callback<E>>,
    recover: bool,
}

enum DrainOutcome {
    Nothing,
    Republish,
    Refetch,
}

/// A live, incrementally-maintained view of one query's result window
///
/// Constructors spawn background fetches and therefore require an ambient
/// tokio runtime.
pub struct Subscription<S: Store> {
    store: Arc<S>,
    emit_window: bool,
    recovery_interval: Duration,
    state: Mutex<SubscriptionState<S>>,
}

impl<S: Store> Subscription<S> {
    /// Create a subscription and kick off the initial fetch
    ///
    /// Fails fast for aggregate queries: the result-window model is
    /// meaningless for counts.
    pub fn new(
        store: Arc<S>,
        query: S::Query,
        options: SubscriptionOptions<S::Entity>,
    ) -> Result<Arc<Self>> {
        if query.is_aggregate() {
            return Err(LiveQueryError::AggregateQuery(query.signature()));
        }

        let SubscriptionOptions {
            emit_window,
            initial_entities,
            recovery_interval_secs,
        } = options;

        let subscription = Arc::new(Subscription {
            store,
            emit_window,
            recovery_interval: Duration::from_secs(recovery_interval_secs),
            state: Mutex::new(SubscriptionState {
                query,
                window: None,
                callbacks: vec![],
                next_callback_id: 0,
                last_result: None,
                queued_records: vec![],
                query_version: 1,
                updates_in_flight: 0,
                last_recovery: None,
            }),
        });

        if let Some(entities) = initial_entities {
            let publish = {
                let mut guard = subscription.state();
                let state = &mut *guard;
                let mut window = MutableResultWindow::new();
                let range = QueryRange::new(0, Some(entities.len()));
                window.add_entities_in_range(entities, range)?;
                state.window = Some(window);
                subscription.publish_locked(state)
            };
            subscription.emit(publish);
        } else {
            subscription.spawn_update(false);
        }

        Ok(subscription)
    }

    fn state(&self) -> MutexGuard<'_, SubscriptionState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A clone of the subscription's current query
    pub fn query(&self) -> S::Query {
        self.state().query.clone()
    }

    /// Register a callback; if a result was already produced the callback
    /// is invoked immediately with the last payload
    pub fn add_callback(
        &self,
        callback: impl Fn(QueryUpdate<S::Entity>) + Send + Sync + 'static,
    ) -> CallbackId {
        let callback: Callback<S::Entity> = Arc::new(callback);
        let (id, replay) = {
            let mut state = self.state();
            let id = CallbackId(state.next_callback_id);
            state.next_callback_id += 1;
            state.callbacks.push((id, Arc::clone(&callback)));
            (id, state.last_result.clone())
        };
        if let Some(result) = replay {
            callback(result);
        }
        id
    }

    /// Unregister a callback; returns false if it was already removed
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut state = self.state();
        let before = state.callbacks.len();
        state.callbacks.retain(|(callback_id, _)| *callback_id != id);
        state.callbacks.len() != before
    }

    pub fn has_callback(&self, id: CallbackId) -> bool {
        self.state()
            .callbacks
            .iter()
            .any(|(callback_id, _)| *callback_id == id)
    }

    pub fn callback_count(&self) -> usize {
        self.state().callbacks.len()
    }

    /// Discard the result of any in-flight fetch once it arrives
    pub fn cancel_pending_update(&self) {
        self.state().query_version += 1;
    }

    /// Queue a change record and reconcile it against the window
    ///
    /// No-op when the record targets another object class. Records
    /// arriving while a fetch is in flight accumulate and are drained
    /// after that fetch's result is merged.
    pub fn apply_change_record(self: &Arc<Self>, record: ChangeRecord<S::Entity>) {
        enum PostDrain<E: Entity> {
            Refetch,
            Publish(Publish<E>),
        }

        let action = {
            let mut guard = self.state();
            let state = &mut *guard;
            if record.object_class != state.query.object_class() || record.objects.is_empty() {
                return;
            }
            state.queued_records.push(record);
            if state.updates_in_flight > 0 {
                None
            } else {
                match self.drain_locked(state) {
                    DrainOutcome::Nothing => None,
                    DrainOutcome::Refetch => Some(PostDrain::Refetch),
                    DrainOutcome::Republish => Some(PostDrain::Publish(self.publish_locked(state))),
                }
            }
        };

        match action {
            Some(PostDrain::Refetch) => self.spawn_update(true),
            Some(PostDrain::Publish(publish)) => self.emit(publish),
            None => {}
        }
    }

    /// Speculatively splice the given ids out of the window and republish
    ///
    /// Applied before the store confirms the write; never rolled back. A
    /// later change record (or an unrelated forced refetch) self-heals if
    /// the speculation turns out to be wrong.
    pub fn optimistically_remove_ids(self: &Arc<Self>, ids: &[String]) {
        let publish = {
            let mut guard = self.state();
            let state = &mut *guard;
            let window = match state.window.as_mut() {
                Some(window) => window,
                None => return,
            };
            let mut removed = false;
            for id in ids {
                if let Some(offset) = window.offset_of_id(id) {
                    if window.remove_entity_at_offset(id, offset).is_ok() {
                        removed = true;
                    }
                }
            }
            if !removed {
                return;
            }
            self.publish_locked(state)
        };
        self.emit(publish);
    }

    /// Fetch whatever the window is missing, merge, and publish
    ///
    /// With a bounded window and no forced refetch, only the missing
    /// contiguous piece of the desired range is fetched (the scroll
    /// path). Store I/O failures propagate to the caller; queued change
    /// records are drained even when the fetch fails.
    pub async fn update(self: &Arc<Self>, must_refetch_entire_range: bool) -> Result<()> {
        let mut force_refetch = must_refetch_entire_range;

        loop {
            // Plan the fetch
            let (version, fetch_range, format, range_query) = {
                let mut guard = self.state();
                let state = &mut *guard;
                state.updates_in_flight += 1;
                let version = state.query_version;

                let desired = state.query.range();
                let current = state.window.as_ref().map(|window| window.range());
                let bounded = !desired.is_infinite()
                    && current.map_or(false, |range| !range.is_infinite());

                let (fetch_range, format) = if bounded && !force_refetch {
                    let pieces = desired.subtract(&current.unwrap_or(desired));
                    let missing = if pieces.len() == 1 { pieces[0] } else { desired };
                    (missing, ResultFormat::Entities)
                } else {
                    let have_no_entities = state
                        .window
                        .as_ref()
                        .map_or(true, |window| window.entity_count() == 0);
                    let format = if have_no_entities {
                        ResultFormat::Entities
                    } else {
                        ResultFormat::Ids
                    };
                    (desired, format)
                };
                (version, fetch_range, format, state.query.with_range(fetch_range))
            };

            debug!(
                "Fetching [{}..{:?}) for {}",
                fetch_range.start(),
                fetch_range.end(),
                range_query.signature()
            );

            let results = match self.store.run(&range_query, format).await {
                Ok(results) => results,
                Err(error) => {
                    self.conclude_without_publish();
                    return Err(error);
                }
            };

            // Merge the fetched slice into the window
            enum MergeNext {
                Stale,
                Failed(LiveQueryError),
                Continue(Vec<String>),
            }

            let next = {
                let mut guard = self.state();
                let state = &mut *guard;
                if state.query_version != version {
                    MergeNext::Stale
                } else {
                    // A non-contiguous window cannot be merged; replace it
                    if let Some(window) = &state.window {
                        if !window.range().is_contiguous_with(&fetch_range) {
                            state.window = None;
                        }
                    }
                    let desired = state.query.range();
                    let window = state.window.get_or_insert_with(MutableResultWindow::new);
                    let merged = match results {
                        FetchResults::Entities(entities) => {
                            window.add_entities_in_range(entities, fetch_range)
                        }
                        FetchResults::Ids(ids) => window.add_ids_in_range(ids, fetch_range),
                    };
                    match merged {
                        Err(error) => MergeNext::Failed(error),
                        Ok(()) => {
                            window.clip_to_range(desired);
                            let missing = window
                                .ids()
                                .iter()
                                .filter(|id| window.entity_with_id(id).is_none())
                                .cloned()
                                .collect();
                            MergeNext::Continue(missing)
                        }
                    }
                }
            };

            let missing_ids = match next {
                MergeNext::Stale => {
                    // Expected control flow: a newer query version owns the
                    // window now
                    self.conclude_without_publish();
                    return Ok(());
                }
                MergeNext::Failed(error) => {
                    self.conclude_without_publish();
                    return Err(error);
                }
                MergeNext::Continue(missing_ids) => missing_ids,
            };

            // Second pass: materialize entities for ids fetched id-only
            if !missing_ids.is_empty() {
                let object_class = range_query.object_class();
                let found = match self.store.find_all(object_class, &missing_ids).await {
                    Ok(found) => found,
                    Err(error) => {
                        self.conclude_without_publish();
                        return Err(error);
                    }
                };
                let mut guard = self.state();
                let state = &mut *guard;
                if state.query_version != version {
                    drop(guard);
                    self.conclude_without_publish();
                    return Ok(());
                }
                if let Some(window) = state.window.as_mut() {
                    for entity in found {
                        window.update_entity(entity);
                    }
                }
            }

            // Publish, folding in any change records that arrived while
            // the fetch was in flight
            let (publish, refetch) = {
                let mut guard = self.state();
                let state = &mut *guard;
                if state.query_version != version {
                    drop(guard);
                    self.conclude_without_publish();
                    return Ok(());
                }
                state.updates_in_flight -= 1;
                let outcome = if state.updates_in_flight == 0 {
                    self.drain_locked(state)
                } else {
                    DrainOutcome::Nothing
                };
                let publish = self.publish_locked(state);
                (publish, matches!(outcome, DrainOutcome::Refetch))
            };

            self.emit(publish);

            if refetch {
                force_refetch = true;
                continue;
            }
            return Ok(());
        }
    }

    pub(crate) fn spawn_update(self: &Arc<Self>, must_refetch_entire_range: bool) {
        let subscription = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = subscription.update(must_refetch_entire_range).await {
                warn!("Background subscription update failed: {}", error);
            }
        });
    }

    /// Swap the query in place, returning true if an update is needed
    ///
    /// Keeps the window only when just the range changed; a filter or
    /// sort change discards it entirely.
    pub(crate) fn swap_query(&self, next: S::Query) -> bool {
        let mut state = self.state();
        let same_signature = state.query.signature() == next.signature();
        if same_signature && state.query.range() == next.range() {
            return false;
        }
        state.query_version += 1;
        if !same_signature {
            state.window = None;
        }
        state.query = next;
        true
    }

    /// Decrement the in-flight count without publishing, draining queued
    /// records if this was the last in-flight fetch
    ///
    /// Used for failed and superseded fetches so records are never
    /// stranded behind one.
    fn conclude_without_publish(self: &Arc<Self>) {
        enum PostDrain<E: Entity> {
            Refetch,
            Publish(Publish<E>),
        }

        let action = {
            let mut guard = self.state();
            let state = &mut *guard;
            state.updates_in_flight = state.updates_in_flight.saturating_sub(1);
            if state.updates_in_flight > 0 {
                None
            } else {
                match self.drain_locked(state) {
                    DrainOutcome::Nothing => None,
                    DrainOutcome::Refetch => Some(PostDrain::Refetch),
                    DrainOutcome::Republish => Some(PostDrain::Publish(self.publish_locked(state))),
                }
            }
        };

        match action {
            Some(PostDrain::Refetch) => self.spawn_update(true),
            Some(PostDrain::Publish(publish)) => self.emit(publish),
            None => {}
        }
    }

    /// Reconcile every queued change record against the window
    ///
    /// Each touched object is classified as a known impact (safe in-place
    /// patch) or an unknown impact (membership or order may have shifted
    /// outside the observed window). Any unknown impact degrades the
    /// whole batch to a full refetch.
    fn drain_locked(&self, state: &mut SubscriptionState<S>) -> DrainOutcome {
        if state.queued_records.is_empty() {
            return DrainOutcome::Nothing;
        }

        let SubscriptionState {
            query,
            window,
            queued_records,
            ..
        } = state;

        // Without a window the records cannot be interpreted yet; leave
        // them queued so they are re-examined against the fresh window.
        let window = match window.as_mut() {
            Some(window) => window,
            None => return DrainOutcome::Refetch,
        };

        let records = std::mem::take(queued_records);
        let mut known_impacts = 0usize;
        let mut unknown_impacts = 0usize;

        for record in records {
            match record.change {
                ChangeType::Unpersist => {
                    for item in &record.objects {
                        if let Some(offset) = window.offset_of_id(item.id()) {
                            if window.remove_entity_at_offset(item.id(), offset).is_ok() {
                                unknown_impacts += 1;
                            }
                        }
                    }
                }
                ChangeType::Persist => {
                    let touched = record.objects.len();
                    let mut record_known = 0usize;
                    let mut record_unknown = 0usize;

                    for item in record.objects {
                        let offset = window.offset_of_id(item.id());
                        let should_be_in_set = query.matches(&item);
                        match (offset, should_be_in_set) {
                            (Some(offset), false) => {
                                if window.remove_entity_at_offset(item.id(), offset).is_ok() {
                                    record_unknown += 1;
                                }
                            }
                            (None, true) => {
                                // The correct position is not locally
                                // knowable; the forced refetch inserts it
                                record_unknown += 1;
                            }
                            (Some(offset), true) => {
                                let preserved =
                                    sort_position_preserved(query, window, &item, offset);
                                window.update_entity(item);
                                if preserved {
                                    record_known += 1;
                                } else {
                                    record_unknown += 1;
                                }
                            }
                            (None, false) => {}
                        }
                    }

                    // Membership changes above the window are invisible
                    // locally, so unaccounted objects taint the batch
                    if query.range().offset() > 0 && record_known + record_unknown < touched {
                        record_unknown += 1;
                    }

                    known_impacts += record_known;
                    unknown_impacts += record_unknown;
                }
            }
        }

        if unknown_impacts > 0 {
            debug!(
                "Reconciled change records with {} unknown impact(s), refetching",
                unknown_impacts
            );
            DrainOutcome::Refetch
        } else if known_impacts > 0 {
            debug!(
                "Reconciled change records with {} known impact(s), republishing in place",
                known_impacts
            );
            DrainOutcome::Republish
        } else {
            DrainOutcome::Nothing
        }
    }

    /// Verify the window and assemble the notification payload
    ///
    /// Consistency violations are logged and reported to the host via a
    /// rate-limited forced refetch, but the publish still goes out so the
    /// UI stays resilient to isolated data bugs.
    fn publish_locked(&self, state: &mut SubscriptionState<S>) -> Publish<S::Entity> {
        let signature = state.query.signature();
        let window = state.window.get_or_insert_with(MutableResultWindow::new);

        let complete = window.is_complete();
        let mut seen = HashSet::with_capacity(window.len());
        let unique = window.ids().iter().all(|id| seen.insert(id.as_str()));

        let mut recover = false;
        if !complete || !unique {
            if !complete {
                warn!(
                    "Result window for {} is missing entities after applying changes",
                    signature
                );
            }
            if !unique {
                warn!(
                    "Result window for {} contains duplicate ids after applying changes",
                    signature
                );
            }
            recover = match state.last_recovery {
                Some(at) if at.elapsed() < self.recovery_interval => false,
                _ => {
                    state.last_recovery = Some(Instant::now());
                    true
                }
            };
        }

        let payload = if self.emit_window {
            QueryUpdate::Window(Arc::new(window.immutable_clone()))
        } else {
            QueryUpdate::Entities(Arc::new(window.entities_in_order()))
        };
        state.last_result = Some(payload.clone());

        let callbacks = state
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        Publish {
            payload,
            callbacks,
            recover,
        }
    }

    /// Invoke callbacks outside all locks
    fn emit(self: &Arc<Self>, publish: Publish<S::Entity>) {
        for callback in &publish.callbacks {
            callback(publish.payload.clone());
        }
        if publish.recover {
            self.spawn_update(true);
        }
    }
}

/// True iff the updated entity still sorts (non-strictly) between its
/// window neighbors under every sort descriptor
///
/// A missing upper neighbor is verified only when the window starts at
/// offset 0; a missing lower neighbor only when the window is known to
/// cover the end of the data. Missing neighbor entities and incomparable
/// sort values make the check unverifiable.
fn sort_position_preserved<Q: ModelQuery>(
    query: &Q,
    window: &MutableResultWindow<Q::Entity>,
    updated: &Q::Entity,
    offset: usize,
) -> bool {
    let window_start = match window.offset() {
        Some(start) => start,
        None => return false,
    };
    let window_end = window_start + window.len();

    let has_prev = offset > window_start;
    let has_next = offset + 1 < window_end;

    if !has_prev && window_start != 0 {
        return false;
    }
    if !has_next {
        let covers_end = match query.range().limit() {
            None => true,
            Some(limit) => window.len() < limit,
        };
        if !covers_end {
            return false;
        }
    }

    let prev = if has_prev {
        match window.entity_at_offset(offset - 1) {
            Some(entity) => Some(entity),
            None => return false,
        }
    } else {
        None
    };
    let next = if has_next {
        match window.entity_at_offset(offset + 1) {
            Some(entity) => Some(entity),
            None => return false,
        }
    } else {
        None
    };

    for descriptor in query.sort_descriptors() {
        let value = updated.sort_value(&descriptor.key);
        if let Some(prev) = prev {
            let before = prev.sort_value(&descriptor.key);
            if !sorts_at_or_before(&before, &value, descriptor.direction) {
                return false;
            }
        }
        if let Some(next) = next {
            let after = next.sort_value(&descriptor.key);
            if !sorts_at_or_before(&value, &after, descriptor.direction) {
                return false;
            }
        }
    }
    true
}

/// Non-strict "a sorts at or before b" under the given direction
///
/// Uses `>=`/`<=` semantics so equal-but-differently-typed values count
/// as unchanged; incomparable values do not.
fn sorts_at_or_before(a: &SortValue, b: &SortValue, direction: SortDirection) -> bool {
    match direction {
        SortDirection::Desc => matches!(
            a.partial_cmp(b),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        SortDirection::Asc => matches!(a.partial_cmp(b), Some(Ordering::Less | Ordering::Equal)),
    }
}
