//! # Fetch Coordinator
//!
//! De-duplicates in-flight requests per key and is the only component that
//! moves an entry's `status`.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         request(key, fetcher)                           │
//! │                                                                         │
//! │   lock ─► entry in flight? ──yes──► superseded? ──no──► join shared    │
//! │              │                          │                               │
//! │              no                        yes ─► await it, then re-plan   │
//! │              ▼                                                          │
//! │           fresh data? ──yes──► return cached value (hit)               │
//! │              │                                                          │
//! │              no                                                         │
//! │              ▼                                                          │
//! │           issue generation N, spawn task, store shared handle          │
//! │   unlock                                                               │
//! │                                                                         │
//! │   task:  fetcher.fetch(key).await            (no lock held)            │
//! │          lock ─► complete(key, N, outcome)                             │
//! │                  • key collected      → drop                           │
//! │                  • N < applied        → discard (later issuance won)   │
//! │                  • otherwise          → success / error, publish       │
//! │                  • fetch superseded   → stay stale, second cycle if    │
//! │                                         subscribed                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fetch runs in its own task, so it completes and updates the store even
//! when every caller stops waiting for it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{FetchFailure, QueryError, QueryResult};
use crate::key::QueryKey;
use crate::state::{consistency_violation, CacheState, CacheStats, QueryCore};
use crate::store::{InFlight, QueryOptions, SharedFetch};
use crate::subscription::SubscriptionManager;
use crate::transport::QueryFetcher;

/// What a request does once it has looked at the entry.
pub(crate) enum Plan {
    /// Fresh data, no fetch needed.
    Fresh(Arc<Value>),
    /// A fetch whose outcome answers this request.
    Join(SharedFetch),
    /// A fetch an invalidation has superseded; wait for it, then look again.
    AwaitSuperseded(SharedFetch),
}

/// Drives entries through `pending → success | error`.
pub struct FetchCoordinator {
    core: Arc<QueryCore>,
}

impl FetchCoordinator {
    pub(crate) fn new(core: Arc<QueryCore>) -> Self {
        FetchCoordinator { core }
    }

    /// Returns data for `key`, fetching only when nothing fresh is cached and
    /// no fetch is already running.
    ///
    /// Concurrent callers share one fetch and observe its single outcome.
    pub async fn request(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: QueryOptions,
    ) -> QueryResult<Arc<Value>> {
        loop {
            let plan = {
                let mut state = self.core.lock();
                if state.closed {
                    return Err(QueryError::ShuttingDown);
                }
                self.plan_locked(&mut state, key, Arc::clone(&fetcher), options)?
            };

            match plan {
                Plan::Fresh(data) => return Ok(data),
                Plan::Join(shared) => return shared.await.map_err(QueryError::from),
                Plan::AwaitSuperseded(shared) => {
                    // The outcome belongs to a fetch issued before the
                    // invalidation; only the state it leaves behind matters.
                    let _ = shared.await;
                }
            }
        }
    }

    /// Starts a fetch for `key` even if one is running. The new fetch carries a
    /// later generation, so its outcome wins over the one it replaces.
    pub async fn refetch(&self, key: &QueryKey) -> QueryResult<Arc<Value>> {
        let shared = {
            let mut state = self.core.lock();
            if state.closed {
                return Err(QueryError::ShuttingDown);
            }
            let entry = state
                .store
                .get(key)
                .ok_or_else(|| QueryError::NotCached(key.to_string()))?;
            let fetcher = entry
                .fetcher
                .clone()
                .ok_or_else(|| QueryError::NoFetcher(key.to_string()))?;
            self.start_locked(&mut state, key, fetcher)?
        };

        shared.await.map_err(QueryError::from)
    }

    /// Decides how to answer a request, starting a fetch if needed.
    ///
    /// Creates the entry on first use; an entry created here without a
    /// subscriber gets its GC timer straight away.
    pub(crate) fn plan_locked(
        &self,
        state: &mut CacheState,
        key: &QueryKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: QueryOptions,
    ) -> QueryResult<Plan> {
        let now = Instant::now();
        let (entry, created) = state.entry_or_insert(key, options);
        entry.adopt_options(options);
        entry.fetcher = Some(Arc::clone(&fetcher));

        let unobserved = created && entry.subscriber_count == 0;

        let decided = if let Some(ref in_flight) = entry.in_flight {
            if in_flight.superseded {
                debug!(key = %key, generation = in_flight.generation, "Waiting out superseded fetch");
                Some(Plan::AwaitSuperseded(in_flight.shared.clone()))
            } else {
                debug!(key = %key, generation = in_flight.generation, "Joining in-flight fetch");
                CacheStats::bump(&self.core.stats.dedup_joins);
                Some(Plan::Join(in_flight.shared.clone()))
            }
        } else if !entry.is_stale(now) {
            entry.data.clone().map(|data| {
                debug!(key = %key, "Cache hit");
                CacheStats::bump(&self.core.stats.hits);
                Plan::Fresh(data)
            })
        } else {
            None
        };

        let plan = match decided {
            Some(plan) => plan,
            None => Plan::Join(self.start_locked(state, key, fetcher)?),
        };

        if unobserved {
            SubscriptionManager::new(Arc::clone(&self.core)).schedule_gc_locked(state, key);
        }

        Ok(plan)
    }

    /// Issues a new generation for `key` and spawns its fetch.
    ///
    /// The fetcher is invoked inside the spawned task, after the caller has
    /// released the lock.
    pub(crate) fn start_locked(
        &self,
        state: &mut CacheState,
        key: &QueryKey,
        fetcher: Arc<dyn QueryFetcher>,
    ) -> QueryResult<SharedFetch> {
        let runtime = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let generation = state.next_generation();
        let entry = state
            .store
            .get_mut(key)
            .ok_or_else(|| consistency_violation(format!("fetch started for missing entry {}", key)))?;

        let core = Arc::clone(&self.core);
        let task_key = key.clone();
        let task = runtime.spawn(async move {
            let outcome = AssertUnwindSafe(async { fetcher.fetch(&task_key).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FetchFailure::transport("fetcher panicked")))
                .map(Arc::new);

            FetchCoordinator::new(core).complete(&task_key, generation, outcome.clone());
            outcome
        });

        let shared = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchFailure::cancelled()),
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            generation,
            shared: shared.clone(),
            superseded: false,
        });
        entry.publish();

        CacheStats::bump(&self.core.stats.fetches);
        debug!(key = %key, generation, "Fetch started");

        Ok(shared)
    }

    /// Applies the outcome of fetch `generation` to `key`.
    pub(crate) fn complete(
        &self,
        key: &QueryKey,
        generation: u64,
        outcome: Result<Arc<Value>, FetchFailure>,
    ) {
        let mut state = self.core.lock();
        let closed = state.closed;

        let Some(entry) = state.store.get_mut(key) else {
            debug!(key = %key, generation, "Dropping completion for collected entry");
            return;
        };

        let tracked = matches!(entry.in_flight, Some(ref f) if f.generation == generation);
        let superseded = tracked && entry.in_flight.as_ref().is_some_and(|f| f.superseded);
        if tracked {
            entry.in_flight = None;
        }

        if generation < entry.applied_generation {
            debug!(
                key = %key,
                generation,
                applied = entry.applied_generation,
                "Discarding response older than the applied one"
            );
            CacheStats::bump(&self.core.stats.discarded_responses);
            entry.publish();
            return;
        }

        entry.applied_generation = generation;
        match outcome {
            Ok(data) => {
                entry.settle_success(data, Instant::now());
                debug!(key = %key, generation, "Fetch succeeded");
            }
            Err(failure) => {
                warn!(key = %key, generation, error = %failure, "Fetch failed");
                CacheStats::bump(&self.core.stats.failures);
                entry.settle_error(failure);
            }
        }

        // Result kept, but it predates the invalidation. An untracked older
        // generation landing under a superseded fetch counts too.
        let pending_supersede = entry.in_flight.as_ref().is_some_and(|f| f.superseded);
        if superseded || pending_supersede {
            entry.invalidated = true;
        }
        entry.publish();

        let refetch_with = match entry.fetcher {
            Some(ref fetcher) if superseded && entry.subscriber_count > 0 && !closed => {
                Some(Arc::clone(fetcher))
            }
            _ => None,
        };

        if let Some(fetcher) = refetch_with {
            debug!(key = %key, "Starting second cycle after superseded fetch");
            if let Err(e) = self.start_locked(&mut state, key, fetcher) {
                warn!(key = %key, error = %e, "Could not start second fetch cycle");
            }
        }
    }
}
