//! # Subscription Manager
//!
//! Tracks observers per key and evicts entries nobody has watched for
//! `gc_time`. The only component that changes `subscriber_count`.
//!
//! ## GC Window
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  subscribers   1 ──unsubscribe──► 0 ─────────── gc_time ──────────►    │
//! │                                    │                         │          │
//! │  gc timer                          armed (id = n)            fires     │
//! │                                    │                         │          │
//! │                  subscribe before ─┘                         ▼          │
//! │                  expiry: timer dropped            count still 0 and    │
//! │                  (aborted), entry kept            timer id still n?    │
//! │                                                   → remove entry       │
//! │                                                                         │
//! │  The timer task holds a Weak reference to the client, so a dropped     │
//! │  client is not kept alive by pending evictions.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::key::QueryKey;
use crate::state::{consistency_violation, CacheState, CacheStats, QueryCore};
use crate::store::{GcTimer, QueryOptions};

/// Proof of one subscription. Releasing it more than once is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    key: QueryKey,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

/// Owns `subscriber_count` and GC timers.
pub struct SubscriptionManager {
    core: Arc<QueryCore>,
}

impl SubscriptionManager {
    pub(crate) fn new(core: Arc<QueryCore>) -> Self {
        SubscriptionManager { core }
    }

    /// Registers an observer of `key`, creating the entry if needed and
    /// cancelling any pending eviction.
    pub fn subscribe(&self, key: &QueryKey) -> QueryResult<SubscriptionHandle> {
        let mut state = self.core.lock();
        if state.closed {
            return Err(QueryError::ShuttingDown);
        }
        Ok(self.subscribe_locked(&mut state, key, None))
    }

    pub(crate) fn subscribe_locked(
        &self,
        state: &mut CacheState,
        key: &QueryKey,
        options: Option<QueryOptions>,
    ) -> SubscriptionHandle {
        let id = state.next_subscription();
        state.subscriptions.insert(id, key.clone());

        let (entry, _) = state.entry_or_insert(key, options.unwrap_or(self.core.defaults));
        if let Some(options) = options {
            entry.adopt_options(options);
        }
        entry.subscriber_count += 1;
        if entry.gc_timer.take().is_some() {
            debug!(key = %key, "GC timer cancelled by new subscriber");
        }
        entry.publish();

        debug!(key = %key, subscribers = entry.subscriber_count, "Subscribed");
        SubscriptionHandle {
            id,
            key: key.clone(),
        }
    }

    /// Releases `handle`. Already-released handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut state = self.core.lock();

        let Some(key) = state.subscriptions.remove(&handle.id) else {
            debug!(key = %handle.key, "Ignoring release of inactive subscription");
            return;
        };

        let Some(entry) = state.store.get_mut(&key) else {
            consistency_violation(format!("live subscription for missing entry {}", key));
            return;
        };

        if entry.subscriber_count == 0 {
            consistency_violation(format!("live subscription for {} with zero count", key));
            return;
        }

        entry.subscriber_count -= 1;
        entry.publish();
        debug!(key = %key, subscribers = entry.subscriber_count, "Unsubscribed");

        if entry.subscriber_count == 0 {
            self.schedule_gc_locked(&mut state, &key);
        }
    }

    /// Arms the eviction timer for an unobserved entry.
    ///
    /// Without a runtime to run the timer on, the entry is evicted at once.
    pub(crate) fn schedule_gc_locked(&self, state: &mut CacheState, key: &QueryKey) {
        let timer_id = state.next_timer();

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!(key = %key, "No runtime for GC timer, evicting now");
                if state.store.remove(key).is_some() {
                    CacheStats::bump(&self.core.stats.evictions);
                }
                return;
            }
        };

        let Some(entry) = state.store.get_mut(key) else {
            return;
        };

        let gc_time = entry.options.gc_time;
        let weak = Arc::downgrade(&self.core);
        let timer_key = key.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(gc_time).await;
            if let Some(core) = weak.upgrade() {
                SubscriptionManager::new(core).collect(&timer_key, timer_id);
            }
        });

        entry.gc_timer = Some(GcTimer::new(timer_id, handle));
        debug!(key = %key, gc_ms = gc_time.as_millis() as u64, "GC timer armed");
    }

    /// Timer callback: removes the entry if it is still unobserved and the
    /// timer that fired is the one currently armed.
    pub(crate) fn collect(&self, key: &QueryKey, timer_id: u64) {
        let mut state = self.core.lock();

        let Some(entry) = state.store.get_mut(key) else {
            return;
        };

        let armed = entry.gc_timer.as_ref().map(|timer| timer.id) == Some(timer_id);
        if !armed || entry.subscriber_count > 0 {
            return;
        }

        if let Some(timer) = entry.gc_timer.take() {
            timer.disarm();
        }
        state.store.remove(key);
        CacheStats::bump(&self.core.stats.evictions);
        debug!(key = %key, "Entry garbage collected");
    }
}
