//! # Cache Store
//!
//! Key → entry map plus the entry type itself. Mechanism only: the fetch
//! coordinator, subscription manager and invalidation engine decide *when*
//! an entry changes; this module only knows *how*.
//!
//! ## Entry State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Cache Entry                                     │
//! │                                                                         │
//! │  status        pending ──► success ◄──┐                                │
//! │                   │           │        │ refetch                        │
//! │                   └──► error ◄┘────────┘                                │
//! │                                                                         │
//! │  fetch_status  idle | fetching   (a refetch keeps status and data)     │
//! │                                                                         │
//! │  data          last good value; kept when a later fetch fails          │
//! │  error         set iff status = error                                  │
//! │  stale         status ≠ success, invalidated, or now ≥ fetched + stale │
//! │  subscribers   > 0  ⇒  no GC timer armed                               │
//! │  in_flight     at most one tracked fetch per key                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers only ever see [`QuerySnapshot`]s, built under the cache lock, so a
//! snapshot never shows `success` without data.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{FetchFailure, QueryError, QueryResult};
use crate::key::QueryKey;
use crate::transport::QueryFetcher;

/// A fetch that any number of callers can await.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, FetchFailure>>>;

// =============================================================================
// Status
// =============================================================================

/// Whether the entry holds data, an error, or nothing yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

/// Whether a fetch is currently running for the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Fetching,
}

// =============================================================================
// Query Options
// =============================================================================

/// Freshness and retention windows for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long data counts as fresh after it was fetched.
    pub stale_time: Duration,
    /// How long an entry with no subscribers survives.
    pub gc_time: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            stale_time: Duration::from_secs(30),
            gc_time: Duration::from_secs(300),
        }
    }
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of an entry, handed to observers and callers.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub data: Option<Arc<Value>>,
    pub error: Option<FetchFailure>,
    /// Wall-clock time the current data arrived.
    pub data_updated_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub subscribers: usize,
}

impl QuerySnapshot {
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// Decodes the cached data into `T`. `Ok(None)` while nothing is cached.
    pub fn data_as<T: DeserializeOwned>(&self) -> QueryResult<Option<T>> {
        match self.data {
            Some(ref value) => T::deserialize(&**value)
                .map(Some)
                .map_err(|e| QueryError::DecodeFailed {
                    key: self.key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Entry Internals
// =============================================================================

/// The fetch currently tracked by an entry.
pub(crate) struct InFlight {
    pub(crate) generation: u64,
    pub(crate) shared: SharedFetch,
    /// Set by an invalidation that landed while this fetch was running.
    pub(crate) superseded: bool,
}

/// Armed eviction timer. Dropping it cancels the timer.
pub(crate) struct GcTimer {
    pub(crate) id: u64,
    handle: Option<JoinHandle<()>>,
}

impl GcTimer {
    pub(crate) fn new(id: u64, handle: JoinHandle<()>) -> Self {
        GcTimer {
            id,
            handle: Some(handle),
        }
    }

    /// Releases the timer without aborting it (used by the timer task itself).
    pub(crate) fn disarm(mut self) {
        self.handle.take();
    }
}

impl Drop for GcTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// One cached query.
pub(crate) struct CacheEntry {
    pub(crate) key: QueryKey,
    pub(crate) status: QueryStatus,
    pub(crate) data: Option<Arc<Value>>,
    pub(crate) error: Option<FetchFailure>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) data_updated_at: Option<DateTime<Utc>>,
    /// Forced stale by the invalidation engine.
    pub(crate) invalidated: bool,
    /// Generation of the last completion written to the entry.
    pub(crate) applied_generation: u64,
    pub(crate) options: QueryOptions,
    pub(crate) subscriber_count: usize,
    pub(crate) gc_timer: Option<GcTimer>,
    pub(crate) in_flight: Option<InFlight>,
    /// Most recently supplied fetcher; used for refetches nobody awaits.
    pub(crate) fetcher: Option<Arc<dyn QueryFetcher>>,
    updates: watch::Sender<QuerySnapshot>,
}

impl CacheEntry {
    pub(crate) fn new(key: QueryKey, options: QueryOptions) -> Self {
        let initial = QuerySnapshot {
            key: key.clone(),
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data: None,
            error: None,
            data_updated_at: None,
            is_stale: true,
            subscribers: 0,
        };
        let (updates, _) = watch::channel(initial);

        CacheEntry {
            key,
            status: QueryStatus::Pending,
            data: None,
            error: None,
            fetched_at: None,
            data_updated_at: None,
            invalidated: false,
            applied_generation: 0,
            options,
            subscriber_count: 0,
            gc_timer: None,
            in_flight: None,
            fetcher: None,
            updates,
        }
    }

    /// Takes the caller's stale time; keeps the longest GC window seen.
    pub(crate) fn adopt_options(&mut self, options: QueryOptions) {
        self.options.stale_time = options.stale_time;
        self.options.gc_time = self.options.gc_time.max(options.gc_time);
    }

    /// Instant at which the current data stops being fresh.
    pub(crate) fn stale_at(&self) -> Option<Instant> {
        self.fetched_at.map(|at| at + self.options.stale_time)
    }

    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        if self.status != QueryStatus::Success || self.invalidated {
            return true;
        }
        match self.stale_at() {
            Some(stale_at) => now >= stale_at,
            None => true,
        }
    }

    pub(crate) fn fetch_status(&self) -> FetchStatus {
        if self.in_flight.is_some() {
            FetchStatus::Fetching
        } else {
            FetchStatus::Idle
        }
    }

    pub(crate) fn snapshot(&self, now: Instant) -> QuerySnapshot {
        QuerySnapshot {
            key: self.key.clone(),
            status: self.status,
            fetch_status: self.fetch_status(),
            data: self.data.clone(),
            error: self.error.clone(),
            data_updated_at: self.data_updated_at,
            is_stale: self.is_stale(now),
            subscribers: self.subscriber_count,
        }
    }

    /// Pushes the current state to observers.
    pub(crate) fn publish(&self) {
        self.updates.send_replace(self.snapshot(Instant::now()));
    }

    pub(crate) fn watch(&self) -> watch::Receiver<QuerySnapshot> {
        self.updates.subscribe()
    }

    pub(crate) fn settle_success(&mut self, data: Arc<Value>, now: Instant) {
        self.status = QueryStatus::Success;
        self.data = Some(data);
        self.error = None;
        self.fetched_at = Some(now);
        self.data_updated_at = Some(Utc::now());
        self.invalidated = false;
    }

    /// Records a failure. Previously fetched data stays in place.
    pub(crate) fn settle_error(&mut self, failure: FetchFailure) {
        self.status = QueryStatus::Error;
        self.error = Some(failure);
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// All cached entries, keyed by value.
#[derive(Default)]
pub(crate) struct CacheStore {
    entries: HashMap<QueryKey, CacheEntry>,
}

impl CacheStore {
    pub(crate) fn get(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &QueryKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub(crate) fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    /// Returns the entry for `key`, creating it when missing.
    pub(crate) fn get_or_insert(
        &mut self,
        key: &QueryKey,
        options: QueryOptions,
    ) -> (&mut CacheEntry, bool) {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(slot) => (slot.into_mut(), false),
            Entry::Vacant(slot) => (slot.insert(CacheEntry::new(key.clone(), options)), true),
        }
    }

    pub(crate) fn remove(&mut self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Entries whose key extends `prefix`.
    pub(crate) fn find_by_prefix<'a>(
        &'a self,
        prefix: &'a QueryKey,
    ) -> impl Iterator<Item = &'a CacheEntry> + 'a {
        self.entries
            .values()
            .filter(move |entry| prefix.is_prefix_of(&entry.key))
    }

    /// Keys matched by at least one of `prefixes`, in key order.
    pub(crate) fn keys_matching(&self, prefixes: &[QueryKey]) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .entries
            .keys()
            .filter(|key| prefixes.iter().any(|prefix| prefix.is_prefix_of(key)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every entry, dropping (and so cancelling) their GC timers.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{pledge_detail, pledge_list};
    use almoner_core::{ParamBag, ParamField};
    use serde_json::json;

    fn options(stale_ms: u64) -> QueryOptions {
        QueryOptions::default().with_stale_time(Duration::from_millis(stale_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_window() {
        let mut entry = CacheEntry::new(pledge_detail(7), options(1_000));
        let start = Instant::now();
        assert!(entry.is_stale(start));

        entry.settle_success(Arc::new(json!({"id": 7})), start);
        assert!(!entry.is_stale(start + Duration::from_millis(999)));
        assert!(entry.is_stale(start + Duration::from_millis(1_000)));

        entry.invalidated = true;
        assert!(entry.is_stale(start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_last_good_data() {
        let mut entry = CacheEntry::new(pledge_detail(7), options(1_000));
        entry.settle_success(Arc::new(json!({"id": 7})), Instant::now());
        entry.settle_error(FetchFailure::transport("reset"));

        let snapshot = entry.snapshot(Instant::now());
        assert!(snapshot.is_error());
        assert!(snapshot.is_stale);
        assert_eq!(snapshot.data.as_deref(), Some(&json!({"id": 7})));
        assert!(snapshot.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_error_and_invalidation() {
        let mut entry = CacheEntry::new(pledge_detail(7), options(1_000));
        entry.settle_error(FetchFailure::transport("reset"));
        entry.invalidated = true;
        entry.settle_success(Arc::new(json!(1)), Instant::now());

        assert!(entry.error.is_none());
        assert!(!entry.invalidated);
        assert_eq!(entry.status, QueryStatus::Success);
    }

    #[test]
    fn test_adopt_options_keeps_longest_gc() {
        let mut entry = CacheEntry::new(
            pledge_detail(7),
            QueryOptions::default().with_gc_time(Duration::from_secs(600)),
        );
        entry.adopt_options(options(5).with_gc_time(Duration::from_secs(60)));
        assert_eq!(entry.options.stale_time, Duration::from_millis(5));
        assert_eq!(entry.options.gc_time, Duration::from_secs(600));
    }

    #[test]
    fn test_find_by_prefix() {
        let mut store = CacheStore::default();
        let contact_3 = pledge_list(ParamBag::new().with(ParamField::ContactId, 3));
        let contact_4 = pledge_list(ParamBag::new().with(ParamField::ContactId, 4));
        store.put(CacheEntry::new(contact_3.clone(), QueryOptions::default()));
        store.put(CacheEntry::new(contact_4.clone(), QueryOptions::default()));
        store.put(CacheEntry::new(pledge_detail(7), QueryOptions::default()));

        let lists = pledge_list(ParamBag::new());
        assert_eq!(store.find_by_prefix(&lists).count(), 2);

        let scoped = pledge_list(ParamBag::new().with(ParamField::ContactId, 3));
        let found: Vec<_> = store.find_by_prefix(&scoped).map(|e| e.key.clone()).collect();
        assert_eq!(found, vec![contact_3]);

        let matched = store.keys_matching(&[pledge_detail(7), scoped]);
        assert_eq!(matched.len(), 2);

        assert_eq!(store.clear(), 3);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_snapshot_decodes_data() {
        let mut entry = CacheEntry::new(pledge_detail(7), QueryOptions::default());
        let snapshot = entry.snapshot(Instant::now());
        assert_eq!(snapshot.data_as::<i64>().unwrap(), None);

        entry.data = Some(Arc::new(json!(42)));
        let snapshot = entry.snapshot(Instant::now());
        assert_eq!(snapshot.data_as::<i64>().unwrap(), Some(42));
        assert!(snapshot.data_as::<String>().is_err());
    }
}
