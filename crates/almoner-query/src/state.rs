//! # Shared Client State
//!
//! The single lock every cache transition runs under, plus the counters that
//! describe what the cache has been doing.
//!
//! ## Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  QueryCore (Arc, shared by client, observers, fetch tasks)             │
//! │  ├── Mutex<CacheState>                                                 │
//! │  │     ├── CacheStore           key → entry                            │
//! │  │     ├── subscriptions        handle id → key                        │
//! │  │     └── counters             generations, handle ids, timer ids     │
//! │  ├── InvalidationTable          read-only after construction           │
//! │  └── CacheStats                 atomics, readable without the lock     │
//! │                                                                         │
//! │  The mutex is a std mutex: critical sections never await, the only     │
//! │  suspension point is the fetcher, which runs outside the lock.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::error;

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::invalidation::InvalidationTable;
use crate::key::QueryKey;
use crate::store::{CacheEntry, CacheStore, QueryOptions};

// =============================================================================
// Cache State
// =============================================================================

/// Everything guarded by the cache lock.
#[derive(Default)]
pub(crate) struct CacheState {
    pub(crate) store: CacheStore,
    /// Live subscription handles. A handle missing here is already released.
    pub(crate) subscriptions: HashMap<u64, QueryKey>,
    pub(crate) closed: bool,
    next_generation: u64,
    next_subscription: u64,
    next_timer: u64,
}

impl CacheState {
    /// Issues the next fetch generation. Generations are global, so they also
    /// order fetches within a key.
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub(crate) fn next_subscription(&mut self) -> u64 {
        self.next_subscription += 1;
        self.next_subscription
    }

    pub(crate) fn next_timer(&mut self) -> u64 {
        self.next_timer += 1;
        self.next_timer
    }

    /// Returns the entry for `key`, creating it when missing.
    pub(crate) fn entry_or_insert(
        &mut self,
        key: &QueryKey,
        options: QueryOptions,
    ) -> (&mut CacheEntry, bool) {
        self.store.get_or_insert(key, options)
    }
}

// =============================================================================
// Query Core
// =============================================================================

/// State shared by a client and everything it hands out.
pub(crate) struct QueryCore {
    pub(crate) name: String,
    pub(crate) defaults: QueryOptions,
    pub(crate) drain_timeout: Duration,
    pub(crate) rules: InvalidationTable,
    pub(crate) stats: CacheStats,
    state: Mutex<CacheState>,
}

impl QueryCore {
    pub(crate) fn new(config: &QueryConfig, rules: InvalidationTable) -> Self {
        QueryCore {
            name: config.client.name.clone(),
            defaults: config.query_options(),
            drain_timeout: config.drain_timeout(),
            rules,
            stats: CacheStats::default(),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("query cache mutex poisoned")
    }
}

/// Logs a broken internal invariant and returns it as an error value.
pub(crate) fn consistency_violation(message: impl Into<String>) -> QueryError {
    let message = message.into();
    error!(violation = %message, "Query cache consistency violation");
    QueryError::ConsistencyViolation(message)
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Running counters for the cache.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    pub(crate) hits: AtomicU64,
    pub(crate) fetches: AtomicU64,
    pub(crate) dedup_joins: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) invalidations: AtomicU64,
    pub(crate) refetches: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) discarded_responses: AtomicU64,
}

impl CacheStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> CacheStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            entries,
            hits: load(&self.hits),
            fetches: load(&self.fetches),
            dedup_joins: load(&self.dedup_joins),
            failures: load(&self.failures),
            invalidations: load(&self.invalidations),
            refetches: load(&self.refetches),
            evictions: load(&self.evictions),
            discarded_responses: load(&self.discarded_responses),
        }
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    /// Entries currently cached.
    pub entries: usize,
    /// Requests answered from fresh data.
    pub hits: u64,
    /// Fetches started (including refetches).
    pub fetches: u64,
    /// Requests that attached to a fetch already in flight.
    pub dedup_joins: u64,
    pub failures: u64,
    /// Entries marked stale by the invalidation engine.
    pub invalidations: u64,
    /// Invalidated entries refetched because they had subscribers.
    pub refetches: u64,
    /// Entries removed by GC.
    pub evictions: u64,
    /// Completions dropped because a later fetch already landed.
    pub discarded_responses: u64,
}
