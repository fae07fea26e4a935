//! Process-wide subscription registry
//!
//! Deduplicates subscriptions by query signature, fans a single store
//! change stream out to every live subscription, and applies optimistic
//! removals when a category write is enqueued but not yet confirmed.
//!
//! The pool is an explicit, injectable registry rather than a module
//! singleton so tests can construct isolated pools; call
//! [`SubscriptionPool::shutdown`] for deterministic teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::query::descriptor::ModelQuery;
use crate::store::Store;
use crate::subscription::{CallbackId, QueryUpdate, Subscription, SubscriptionOptions};
use crate::tasks::PendingWrite;
use crate::types::error::Result;

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Delay before evicting subscriptions whose last callback was
    /// removed; disposals within one delay share a single timer
    pub cleanup_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { cleanup_delay_ms: 1 }
    }
}

struct PoolInner<S: Store> {
    subscriptions: HashMap<String, Arc<Subscription<S>>>,
    /// Keys awaiting a zero-callback check on the shared cleanup timer
    cleanup_pending: Vec<String>,
    shut_down: bool,
}

/// Registry of all live query subscriptions, keyed by query signature
pub struct SubscriptionPool<S: Store> {
    store: Arc<S>,
    config: PoolConfig,
    inner: Mutex<PoolInner<S>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Store> SubscriptionPool<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        Self::with_config(store, PoolConfig::default())
    }

    /// Create a pool and spawn the change-stream forwarding loop
    ///
    /// Requires an ambient tokio runtime.
    pub fn with_config(store: Arc<S>, config: PoolConfig) -> Arc<Self> {
        let change_stream = store.change_stream();
        let pool = Arc::new(SubscriptionPool {
            store,
            config,
            inner: Mutex::new(PoolInner {
                subscriptions: HashMap::new(),
                cleanup_pending: vec![],
                shut_down: false,
            }),
            forward_task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&pool);
        let handle = tokio::spawn(async move {
            while let Ok(record) = change_stream.recv_async().await {
                let pool = match weak.upgrade() {
                    Some(pool) => pool,
                    None => break,
                };
                let subscriptions: Vec<_> = pool
                    .inner()
                    .subscriptions
                    .values()
                    .cloned()
                    .collect();
                for subscription in subscriptions {
                    subscription.apply_change_record(record.clone());
                }
            }
        });
        *pool
            .forward_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        pool
    }

    fn inner(&self) -> MutexGuard<'_, PoolInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find or create the subscription for this query's signature and
    /// register the callback
    ///
    /// The returned disposer must be called exactly once when no longer
    /// interested (extra calls are safe no-ops); otherwise the
    /// subscription leaks until process exit.
    pub fn add(
        self: &Arc<Self>,
        query: S::Query,
        callback: impl Fn(QueryUpdate<S::Entity>) + Send + Sync + 'static,
    ) -> Result<Unsubscriber<S>> {
        let key = query.signature();
        let subscription = {
            let mut inner = self.inner();
            match inner.subscriptions.get(&key) {
                Some(subscription) => Arc::clone(subscription),
                None => {
                    let subscription = Subscription::new(
                        Arc::clone(&self.store),
                        query,
                        SubscriptionOptions::default(),
                    )?;
                    inner
                        .subscriptions
                        .insert(key.clone(), Arc::clone(&subscription));
                    debug!("Created subscription for {}", key);
                    subscription
                }
            }
        };

        // Registered outside the registry lock: the immediate replay may
        // re-enter the pool
        let callback_id = subscription.add_callback(callback);
        Ok(Unsubscriber::new(self, key, callback_id))
    }

    /// Register a pre-built subscription (e.g. one with custom merge
    /// logic) under an explicit key rather than a query signature
    pub fn add_private_subscription(
        self: &Arc<Self>,
        key: impl Into<String>,
        subscription: Arc<Subscription<S>>,
        callback: impl Fn(QueryUpdate<S::Entity>) + Send + Sync + 'static,
    ) -> Unsubscriber<S> {
        let key = key.into();
        self.inner()
            .subscriptions
            .insert(key.clone(), Arc::clone(&subscription));
        let callback_id = subscription.add_callback(callback);
        Unsubscriber::new(self, key, callback_id)
    }

    /// Speculatively shrink the windows of every subscription this
    /// pending write removes entities from, before the store confirms it
    pub fn notify_pending_write(&self, write: &PendingWrite) {
        let subscriptions: Vec<_> = self.inner().subscriptions.values().cloned().collect();
        for subscription in subscriptions {
            let query = subscription.query();
            if let Some(ids) = write.removal_ids(&query) {
                debug!(
                    "Optimistically removing {} id(s) from {}",
                    ids.len(),
                    query.signature()
                );
                subscription.optimistically_remove_ids(ids);
            }
        }
    }

    pub fn notify_pending_writes(&self, writes: &[PendingWrite]) {
        for write in writes {
            self.notify_pending_write(write);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner().subscriptions.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner().subscriptions.contains_key(key)
    }

    /// Stop forwarding change records and drop every subscription
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .forward_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let mut inner = self.inner();
        inner.shut_down = true;
        inner.subscriptions.clear();
        inner.cleanup_pending.clear();
        info!("Subscription pool shut down");
    }

    /// Queue a zero-callback check for the key on the shared cleanup
    /// timer, starting the timer if it isn't already pending
    fn schedule_cleanup_check(self: &Arc<Self>, key: &str) {
        let mut inner = self.inner();
        if inner.shut_down {
            return;
        }
        let start_timer = inner.cleanup_pending.is_empty();
        inner.cleanup_pending.push(key.to_string());
        drop(inner);

        if start_timer {
            let weak = Arc::downgrade(self);
            let delay = Duration::from_millis(self.config.cleanup_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(pool) = weak.upgrade() {
                    pool.run_cleanup_checks();
                }
            });
        }
    }

    fn run_cleanup_checks(&self) {
        let mut inner = self.inner();
        let pending = std::mem::take(&mut inner.cleanup_pending);
        for key in pending {
            let evict = inner
                .subscriptions
                .get(&key)
                .map_or(false, |subscription| subscription.callback_count() == 0);
            if evict {
                inner.subscriptions.remove(&key);
                debug!("Evicted idle subscription for {}", key);
            }
        }
    }
}

/// Disposer returned by [`SubscriptionPool::add`]
///
/// Unregisters the callback and schedules a deferred cleanup check for
/// the subscription. Double disposal, and disposal after the pool has
/// been torn down, are safe no-ops.
pub struct Unsubscriber<S: Store> {
    pool: Weak<SubscriptionPool<S>>,
    key: String,
    callback_id: CallbackId,
    disposed: AtomicBool,
}

impl<S: Store> Unsubscriber<S> {
    fn new(pool: &Arc<SubscriptionPool<S>>, key: String, callback_id: CallbackId) -> Self {
        Unsubscriber {
            pool: Arc::downgrade(pool),
            key,
            callback_id,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = match self.pool.upgrade() {
            Some(pool) => pool,
            None => return,
        };
        let subscription = pool.inner().subscriptions.get(&self.key).cloned();
        if let Some(subscription) = subscription {
            subscription.remove_callback(self.callback_id);
        }
        pool.schedule_cleanup_check(&self.key);
    }
}
