//! Shared test fixtures
//!
//! A thread-like entity, a concrete query type, and a scriptable
//! in-memory store with call counters and resolution gates. Compiled
//! only for tests.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::query::descriptor::{CategoryFilter, ModelQuery};
use crate::query::range::QueryRange;
use crate::store::{FetchResults, ResultFormat, Store};
use crate::subscription::QueryUpdate;
use crate::types::change::ChangeRecord;
use crate::types::entity::{Entity, ObjectClass, SortDescriptor, SortDirection, SortValue};
use crate::types::error::{LiveQueryError, Result};

/// Minimal mail-thread entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Thread {
    pub id: String,
    pub account_id: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub unread: bool,
    pub category_ids: Vec<String>,
}

impl Entity for Thread {
    fn id(&self) -> &str {
        &self.id
    }

    fn account_id(&self) -> Option<&str> {
        Some(&self.account_id)
    }

    fn object_class(&self) -> ObjectClass {
        ObjectClass::from_static("Thread")
    }

    fn sort_value(&self, key: &str) -> SortValue {
        match key {
            "timestamp" => SortValue::Time(self.timestamp),
            "subject" => SortValue::Text(self.subject.clone()),
            "unread" => SortValue::Bool(self.unread),
            _ => SortValue::Null,
        }
    }
}

/// Thread fixture with the given timestamp (seconds) and single category
pub(crate) fn thread(id: &str, timestamp_secs: i64, category: &str) -> Thread {
    Thread {
        id: id.to_string(),
        account_id: "acc-1".to_string(),
        subject: format!("Subject {}", id),
        timestamp: DateTime::from_timestamp(timestamp_secs, 0).unwrap(),
        unread: false,
        category_ids: vec![category.to_string()],
    }
}

/// Concrete query over [`Thread`], newest first by default
#[derive(Debug, Clone)]
pub(crate) struct ThreadQuery {
    pub filter: Option<CategoryFilter>,
    pub unread_only: bool,
    pub sort: Vec<SortDescriptor>,
    pub range: QueryRange,
    pub aggregate: bool,
}

impl ThreadQuery {
    pub fn new() -> Self {
        ThreadQuery {
            filter: None,
            unread_only: false,
            sort: vec![SortDescriptor::desc("timestamp")],
            range: QueryRange::infinite(),
            aggregate: false,
        }
    }

    pub fn with_filter(mut self, filter: CategoryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_range(mut self, range: QueryRange) -> Self {
        self.range = range;
        self
    }

    pub fn as_aggregate(mut self) -> Self {
        self.aggregate = true;
        self
    }
}

impl ModelQuery for ThreadQuery {
    type Entity = Thread;

    fn signature(&self) -> String {
        let order = self
            .sort
            .iter()
            .map(|descriptor| format!("{} {:?}", descriptor.key, descriptor.direction))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT * FROM Thread WHERE filter = {:?} AND unread_only = {} ORDER BY {}",
            self.filter, self.unread_only, order
        )
    }

    fn object_class(&self) -> ObjectClass {
        ObjectClass::from_static("Thread")
    }

    fn range(&self) -> QueryRange {
        self.range
    }

    fn with_range(&self, range: QueryRange) -> Self {
        let mut query = self.clone();
        query.range = range;
        query
    }

    fn matches(&self, entity: &Thread) -> bool {
        let in_category = self.filter.as_ref().map_or(true, |filter| {
            entity
                .category_ids
                .iter()
                .any(|category_id| filter.matches_category(category_id))
        });
        in_category && (!self.unread_only || entity.unread)
    }

    fn sort_descriptors(&self) -> &[SortDescriptor] {
        &self.sort
    }

    fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    fn category_filter(&self) -> Option<&CategoryFilter> {
        self.filter.as_ref()
    }
}

fn sort_threads(rows: &mut [Thread], descriptors: &[SortDescriptor]) {
    rows.sort_by(|a, b| {
        for descriptor in descriptors {
            let ordering = a
                .sort_value(&descriptor.key)
                .partial_cmp(&b.sort_value(&descriptor.key))
                .unwrap_or(CmpOrdering::Equal);
            let ordering = match descriptor.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != CmpOrdering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    });
}

/// In-memory store with call counters and resolution gates
///
/// Each armed gate parks the next `run` call until the test releases it,
/// giving tests control over fetch resolution order.
pub(crate) struct MemoryStore {
    threads: Mutex<Vec<Thread>>,
    run_calls: AtomicUsize,
    find_all_calls: AtomicUsize,
    failing_runs: AtomicUsize,
    runs: Mutex<Vec<(QueryRange, ResultFormat)>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    change_tx: flume::Sender<ChangeRecord<Thread>>,
    change_rx: flume::Receiver<ChangeRecord<Thread>>,
}

impl MemoryStore {
    pub fn new(threads: Vec<Thread>) -> Self {
        let (change_tx, change_rx) = flume::unbounded();
        MemoryStore {
            threads: Mutex::new(threads),
            run_calls: AtomicUsize::new(0),
            find_all_calls: AtomicUsize::new(0),
            failing_runs: AtomicUsize::new(0),
            runs: Mutex::new(vec![]),
            gates: Mutex::new(VecDeque::new()),
            change_tx,
            change_rx,
        }
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn find_all_calls(&self) -> usize {
        self.find_all_calls.load(Ordering::SeqCst)
    }

    /// Every `run` call so far as (range, format) pairs
    pub fn runs(&self) -> Vec<(QueryRange, ResultFormat)> {
        self.runs.lock().unwrap().clone()
    }

    /// Make the next `count` calls to `run` fail with a store error
    pub fn fail_next_runs(&self, count: usize) {
        self.failing_runs.store(count, Ordering::SeqCst);
    }

    /// Park the next `run` call until the returned sender fires
    pub fn arm_gate(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        self.gates.lock().unwrap().push_back(receiver);
        sender
    }

    pub fn upsert(&self, thread: Thread) {
        let mut threads = self.threads.lock().unwrap();
        match threads.iter_mut().find(|existing| existing.id == thread.id) {
            Some(existing) => *existing = thread,
            None => threads.push(thread),
        }
    }

    pub fn remove(&self, id: &str) -> Option<Thread> {
        let mut threads = self.threads.lock().unwrap();
        let position = threads.iter().position(|thread| thread.id == id)?;
        Some(threads.remove(position))
    }

    /// Push a change record onto the store's notification stream
    pub fn emit(&self, record: ChangeRecord<Thread>) {
        self.change_tx.send(record).unwrap();
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Entity = Thread;
    type Query = ThreadQuery;

    async fn run(
        &self,
        query: &ThreadQuery,
        format: ResultFormat,
    ) -> Result<FetchResults<Thread>> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.runs.lock().unwrap().push((query.range(), format));

        let gate = self.gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.failing_runs.load(Ordering::SeqCst) > 0 {
            self.failing_runs.fetch_sub(1, Ordering::SeqCst);
            return Err(LiveQueryError::Store("store offline".to_string()));
        }

        let mut rows: Vec<Thread> = self
            .threads
            .lock()
            .unwrap()
            .iter()
            .filter(|thread| query.matches(thread))
            .cloned()
            .collect();
        sort_threads(&mut rows, query.sort_descriptors());

        let range = query.range();
        let start = range.offset().min(rows.len());
        let end = range.end().map_or(rows.len(), |end| end.min(rows.len()));
        let rows = rows[start..end].to_vec();

        Ok(match format {
            ResultFormat::Entities => FetchResults::Entities(rows),
            ResultFormat::Ids => {
                FetchResults::Ids(rows.into_iter().map(|thread| thread.id).collect())
            }
        })
    }

    async fn find_all(
        &self,
        _object_class: ObjectClass,
        ids: &[String],
    ) -> Result<Vec<Thread>> {
        self.find_all_calls.fetch_add(1, Ordering::SeqCst);
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .threads
            .lock()
            .unwrap()
            .iter()
            .filter(|thread| wanted.contains(thread.id.as_str()))
            .cloned()
            .collect())
    }

    fn change_stream(&self) -> flume::Receiver<ChangeRecord<Thread>> {
        self.change_rx.clone()
    }
}

/// A callback that appends every payload it receives to a shared vec
pub(crate) fn collect_updates() -> (
    Arc<Mutex<Vec<QueryUpdate<Thread>>>>,
    impl Fn(QueryUpdate<Thread>) + Send + Sync + 'static,
) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let callback = move |update| sink.lock().unwrap().push(update);
    (updates, callback)
}
