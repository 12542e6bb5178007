//! # Query Client
//!
//! The explicitly constructed context object screens talk to. Cloning a
//! client is cheap; all clones share one cache.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  QueryClient::new(&config)                                             │
//! │        │                                                                │
//! │        ├── use_query(key, fetcher, options) ──► QueryObserver          │
//! │        │      subscribed while alive; snapshot() / changed().await     │
//! │        │                                                                │
//! │        ├── fetch_query(key, ..).await         one-off read, no observer│
//! │        │                                                                │
//! │        ├── use_mutation(kind, fn, options) ──► MutationHandle          │
//! │        │      trigger(&input).await → result + invalidation report     │
//! │        │                                                                │
//! │        └── shutdown().await                                            │
//! │               1. refuse new work                                       │
//! │               2. wait for in-flight fetches (drain timeout)            │
//! │               3. cancel GC timers, clear the store                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::QueryConfig;
use crate::error::{QueryError, QueryResult};
use crate::fetch::FetchCoordinator;
use crate::invalidation::{
    InvalidationEngine, InvalidationReport, InvalidationTable, MutationKind, MutationRecord,
};
use crate::key::QueryKey;
use crate::state::{CacheStatsSnapshot, QueryCore};
use crate::store::{FetchStatus, QueryOptions, QuerySnapshot, QueryStatus};
use crate::subscription::{SubscriptionHandle, SubscriptionManager};
use crate::transport::{MutationFn, QueryFetcher};

// =============================================================================
// Query Client
// =============================================================================

/// Handle to a process-local query cache.
#[derive(Clone)]
pub struct QueryClient {
    core: Arc<QueryCore>,
}

impl QueryClient {
    /// Creates a client with the standard invalidation rules.
    pub fn new(config: &QueryConfig) -> Self {
        Self::with_rules(config, InvalidationTable::standard())
    }

    /// Creates a client with a custom rule table.
    pub fn with_rules(config: &QueryConfig, rules: InvalidationTable) -> Self {
        let core = QueryCore::new(config, rules);
        info!(
            client = %core.name,
            stale_ms = core.defaults.stale_time.as_millis() as u64,
            gc_ms = core.defaults.gc_time.as_millis() as u64,
            rules = ?core.rules,
            "Query client created"
        );
        QueryClient {
            core: Arc::new(core),
        }
    }

    /// Options from the client configuration.
    pub fn default_options(&self) -> QueryOptions {
        self.core.defaults
    }

    fn coordinator(&self) -> FetchCoordinator {
        FetchCoordinator::new(Arc::clone(&self.core))
    }

    fn subscriptions(&self) -> SubscriptionManager {
        SubscriptionManager::new(Arc::clone(&self.core))
    }

    fn engine(&self) -> InvalidationEngine {
        InvalidationEngine::new(Arc::clone(&self.core))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Subscribes to `key` for the lifetime of the returned observer and
    /// starts a fetch if nothing fresh is cached.
    ///
    /// Must be called inside a tokio runtime.
    pub fn use_query(
        &self,
        key: QueryKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: QueryOptions,
    ) -> QueryResult<QueryObserver> {
        let mut state = self.core.lock();
        if state.closed {
            return Err(QueryError::ShuttingDown);
        }

        let subscriptions = self.subscriptions();
        let handle = subscriptions.subscribe_locked(&mut state, &key, Some(options));

        // A fresh hit or a joined fetch both leave the observer up to date;
        // a superseded fetch is followed by a second cycle since we subscribed.
        if let Err(e) = self.coordinator().plan_locked(&mut state, &key, fetcher, options) {
            drop(state);
            subscriptions.unsubscribe(&handle);
            return Err(e);
        }

        let receiver = match state.store.get(&key) {
            Some(entry) => entry.watch(),
            None => {
                return Err(crate::state::consistency_violation(format!(
                    "subscribed entry {} vanished",
                    key
                )))
            }
        };

        Ok(QueryObserver {
            client: self.clone(),
            handle,
            receiver,
        })
    }

    /// Returns data for `key` without subscribing. Shares an in-flight fetch
    /// with any other caller.
    pub async fn fetch_query(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: QueryOptions,
    ) -> QueryResult<Arc<Value>> {
        self.coordinator().request(key, fetcher, options).await
    }

    /// [`fetch_query`](Self::fetch_query) decoded into `T`.
    pub async fn fetch_query_as<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: QueryOptions,
    ) -> QueryResult<T> {
        let data = self.fetch_query(key, fetcher, options).await?;
        T::deserialize(data.as_ref()).map_err(|e| QueryError::DecodeFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Forces a new fetch for a cached key, superseding any running one.
    pub async fn refetch(&self, key: &QueryKey) -> QueryResult<Arc<Value>> {
        self.coordinator().refetch(key).await
    }

    /// Current state of `key`, if cached.
    pub fn get_query(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        let state = self.core.lock();
        state
            .store
            .get(key)
            .map(|entry| entry.snapshot(Instant::now()))
    }

    /// Snapshots of every cached key under `prefix`, in key order.
    pub fn find_queries(&self, prefix: &QueryKey) -> Vec<QuerySnapshot> {
        let now = Instant::now();
        let state = self.core.lock();
        let mut found: Vec<QuerySnapshot> = state
            .store
            .find_by_prefix(prefix)
            .map(|entry| entry.snapshot(now))
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    // =========================================================================
    // Writes & Invalidation
    // =========================================================================

    /// Marks everything under `prefixes` stale; observed entries refetch now.
    pub fn invalidate(&self, prefixes: &[QueryKey]) -> QueryResult<InvalidationReport> {
        self.engine().invalidate(prefixes.to_vec())
    }

    /// Feeds a completed write to the invalidation engine.
    pub fn on_mutation_success(&self, record: &MutationRecord) -> QueryResult<InvalidationReport> {
        self.engine().on_mutation_success(record, &[])
    }

    /// Binds a mutation function to this client.
    pub fn use_mutation(
        &self,
        kind: MutationKind,
        mutation: Arc<dyn MutationFn>,
        options: MutationOptions,
    ) -> MutationHandle {
        MutationHandle {
            client: self.clone(),
            kind,
            mutation,
            options,
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes without an observer. Pair with [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, key: &QueryKey) -> QueryResult<SubscriptionHandle> {
        self.subscriptions().subscribe(key)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.subscriptions().unsubscribe(handle)
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    pub fn stats(&self) -> CacheStatsSnapshot {
        let entries = self.core.lock().store.len();
        self.core.stats.snapshot(entries)
    }

    pub fn len(&self) -> usize {
        self.core.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and subscription. Observers stop receiving updates.
    pub fn clear(&self) {
        let mut state = self.core.lock();
        state.subscriptions.clear();
        let removed = state.store.clear();
        info!(client = %self.core.name, removed, "Query cache cleared");
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.lock().closed
    }

    /// Stops the client: refuses new work, waits up to the drain timeout for
    /// running fetches, then cancels GC timers and clears the store.
    pub async fn shutdown(&self) {
        let pending: Vec<_> = {
            let mut state = self.core.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state
                .store
                .iter()
                .filter_map(|entry| entry.in_flight.as_ref().map(|f| f.shared.clone()))
                .collect()
        };

        info!(
            client = %self.core.name,
            in_flight = pending.len(),
            "Query client shutting down"
        );

        if tokio::time::timeout(self.core.drain_timeout, join_all(pending))
            .await
            .is_err()
        {
            warn!(
                client = %self.core.name,
                timeout_ms = self.core.drain_timeout.as_millis() as u64,
                "In-flight fetches did not drain before timeout"
            );
        }

        self.clear();
        info!(client = %self.core.name, "Query client stopped");
    }
}

// =============================================================================
// Query Observer
// =============================================================================

/// A live subscription to one key. Unsubscribes on drop.
pub struct QueryObserver {
    client: QueryClient,
    handle: SubscriptionHandle,
    receiver: watch::Receiver<QuerySnapshot>,
}

impl QueryObserver {
    pub fn key(&self) -> &QueryKey {
        self.handle.key()
    }

    /// Latest state: `{status, data, error}` plus fetch bookkeeping.
    pub fn snapshot(&self) -> QuerySnapshot {
        self.receiver.borrow().clone()
    }

    /// Waits for the next change and returns it.
    ///
    /// Fails with [`QueryError::NotCached`] once the entry has been cleared.
    pub async fn changed(&mut self) -> QueryResult<QuerySnapshot> {
        self.receiver
            .changed()
            .await
            .map_err(|_| QueryError::NotCached(self.handle.key().to_string()))?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Waits until no fetch is running and the entry has left `pending`.
    pub async fn settled(&mut self) -> QueryResult<QuerySnapshot> {
        let key = self.handle.key().to_string();
        let snapshot = self
            .receiver
            .wait_for(|s| s.fetch_status == FetchStatus::Idle && s.status != QueryStatus::Pending)
            .await
            .map_err(|_| QueryError::NotCached(key))?;
        Ok(snapshot.clone())
    }

    /// Forces a refetch of the observed key.
    pub async fn refetch(&self) -> QueryResult<Arc<Value>> {
        self.client.refetch(self.handle.key()).await
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.client.unsubscribe(&self.handle);
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// Per-handle mutation options.
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Prefixes invalidated on success in addition to the rule table's.
    pub on_success_keys: Vec<QueryKey>,
}

impl MutationOptions {
    pub fn on_success_keys(keys: impl IntoIterator<Item = QueryKey>) -> Self {
        MutationOptions {
            on_success_keys: keys.into_iter().collect(),
        }
    }
}

/// What a successful trigger produced.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub result: Value,
    pub invalidation: InvalidationReport,
}

impl MutationOutcome {
    pub fn result_as<T: DeserializeOwned>(&self) -> QueryResult<T> {
        Ok(T::deserialize(&self.result)?)
    }
}

/// A mutation function bound to a client.
#[derive(Clone)]
pub struct MutationHandle {
    client: QueryClient,
    kind: MutationKind,
    mutation: Arc<dyn MutationFn>,
    options: MutationOptions,
}

impl MutationHandle {
    pub fn kind(&self) -> &MutationKind {
        &self.kind
    }

    /// Runs the mutation. On success the result is fed to the invalidation
    /// engine before this returns; on failure nothing is invalidated.
    pub async fn trigger<I: Serialize + ?Sized>(&self, input: &I) -> QueryResult<MutationOutcome> {
        if self.client.is_shut_down() {
            return Err(QueryError::ShuttingDown);
        }

        let input = serde_json::to_value(input)?;
        let result = match self.mutation.mutate(input.clone()).await {
            Ok(result) => result,
            Err(failure) => {
                warn!(kind = %self.kind, error = %failure, "Mutation failed");
                return Err(failure.into());
            }
        };

        let record = MutationRecord::new(self.kind.clone(), input, result.clone());
        let invalidation = self
            .client
            .engine()
            .on_mutation_success(&record, &self.options.on_success_keys)?;

        Ok(MutationOutcome {
            result,
            invalidation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchFailure, MutationFailure};
    use crate::key::{payments_by_contact, payments_by_pledge, pledge_detail, pledge_list};
    use almoner_core::inputs::CreatePaymentInput;
    use almoner_core::{Money, ParamBag, ParamField, PaymentMethod};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn client() -> QueryClient {
        QueryClient::new(&QueryConfig::default())
    }

    fn options() -> QueryOptions {
        QueryOptions::default()
            .with_stale_time(Duration::from_secs(30))
            .with_gc_time(Duration::from_secs(60))
    }

    /// Fetcher that counts calls and answers after `delay`.
    fn counting(delay: Duration) -> (Arc<AtomicUsize>, Arc<dyn QueryFetcher>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher: Arc<dyn QueryFetcher> = Arc::new(move |key: QueryKey| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(delay).await;
                Ok::<_, FetchFailure>(json!({ "key": key.to_string(), "call": n }))
            }
        });
        (calls, fetcher)
    }

    fn payment_input(pledge_id: i64, contact_id: i64) -> CreatePaymentInput {
        CreatePaymentInput {
            pledge_id,
            contact_id,
            amount: Money::from_cents(5_000),
            method: PaymentMethod::Card,
            reference: None,
            paid_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        }
    }

    fn ok_mutation() -> Arc<dyn MutationFn> {
        Arc::new(|_input: Value| async { Ok::<_, MutationFailure>(json!({ "id": 501 })) })
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_receives_data() {
        let client = client();
        let (calls, fetcher) = counting(Duration::from_millis(20));

        let mut observer = client.use_query(pledge_detail(7), fetcher, options()).unwrap();
        assert!(observer.snapshot().is_pending());

        let snapshot = observer.settled().await.unwrap();
        assert!(snapshot.is_success());
        assert_eq!(snapshot.data.unwrap()["call"], 1);
        assert_eq!(snapshot.subscribers, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_across_observers_and_fetches() {
        let client = client();
        let (calls, fetcher) = counting(Duration::from_millis(20));
        let key = pledge_detail(7);

        let _a = client.use_query(key.clone(), fetcher.clone(), options()).unwrap();
        let _b = client.use_query(key.clone(), fetcher.clone(), options()).unwrap();
        let (x, y) = tokio::join!(
            client.fetch_query(&key, fetcher.clone(), options()),
            client.fetch_query(&key, fetcher.clone(), options()),
        );

        assert_eq!(x.unwrap(), y.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.get_query(&key).unwrap().subscribers, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_boundary() {
        let client = client();
        let (calls, fetcher) = counting(Duration::ZERO);
        let key = pledge_detail(7);
        let options = options().with_stale_time(Duration::from_millis(1_000));

        client.fetch_query(&key, fetcher.clone(), options).await.unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(!client.get_query(&key).unwrap().is_stale);
        client.fetch_query(&key, fetcher.clone(), options).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(client.get_query(&key).unwrap().is_stale);
        client.fetch_query(&key, fetcher.clone(), options).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_after_last_observer_drops() {
        let client = client();
        let (_, fetcher) = counting(Duration::ZERO);
        let key = pledge_detail(7);

        let mut observer = client.use_query(key.clone(), fetcher, options()).unwrap();
        observer.settled().await.unwrap();
        drop(observer);

        tokio::time::sleep(Duration::from_millis(59_999)).await;
        assert!(client.get_query(&key).is_some());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(client.get_query(&key).is_none());
        assert_eq!(client.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_query_entry_is_collected() {
        let client = client();
        let (_, fetcher) = counting(Duration::ZERO);
        let key = pledge_detail(7);

        client.fetch_query(&key, fetcher, options()).await.unwrap();
        assert_eq!(client.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(client.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_payment_propagation() {
        let client = client();
        let (_, fetcher) = counting(Duration::ZERO);
        let page_1 = ParamBag::new().with(ParamField::Page, 1);

        let affected = vec![
            payments_by_pledge(7, page_1.clone()),
            payments_by_contact(3, ParamBag::new()),
            pledge_list(ParamBag::new().with(ParamField::ContactId, 3)),
            pledge_list(ParamBag::new().with(ParamField::ContactId, 4)),
            pledge_detail(7),
        ];
        let untouched = vec![
            payments_by_pledge(8, page_1.clone()),
            payments_by_contact(4, ParamBag::new()),
            pledge_detail(8),
        ];
        for key in affected.iter().chain(&untouched) {
            client.fetch_query(key, fetcher.clone(), options()).await.unwrap();
        }

        let mutation = client.use_mutation(
            MutationKind::CREATE_PAYMENT,
            ok_mutation(),
            MutationOptions::default(),
        );
        let outcome = mutation.trigger(&payment_input(7, 3)).await.unwrap();

        let mut expected = affected.clone();
        expected.sort();
        assert_eq!(outcome.invalidation.invalidated, expected);
        assert_eq!(outcome.invalidation.deferred.len(), affected.len());
        assert!(outcome.invalidation.refetched.is_empty());
        assert_eq!(outcome.result_as::<Value>().unwrap()["id"], 501);

        for key in &affected {
            assert!(client.get_query(key).unwrap().is_stale, "{} should be stale", key);
        }
        for key in &untouched {
            assert!(!client.get_query(key).unwrap().is_stale, "{} should be fresh", key);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_and_lazy_refresh() {
        let client = client();
        let (detail_calls, detail_fetcher) = counting(Duration::from_millis(5));
        let (list_calls, list_fetcher) = counting(Duration::from_millis(5));
        let detail = pledge_detail(7);
        let list = pledge_list(ParamBag::new().with(ParamField::ContactId, 3));

        let mut detail_observer = client
            .use_query(detail.clone(), detail_fetcher, options())
            .unwrap();
        detail_observer.settled().await.unwrap();
        client
            .fetch_query(&list, list_fetcher.clone(), options())
            .await
            .unwrap();

        let mutation = client.use_mutation(
            MutationKind::CREATE_PAYMENT,
            ok_mutation(),
            MutationOptions::default(),
        );
        let outcome = mutation.trigger(&payment_input(7, 3)).await.unwrap();
        assert_eq!(outcome.invalidation.refetched, vec![detail.clone()]);
        assert_eq!(outcome.invalidation.deferred, vec![list.clone()]);

        let snapshot = detail_observer.settled().await.unwrap();
        assert_eq!(snapshot.data.unwrap()["call"], 2);
        assert!(!snapshot.is_stale);
        assert_eq!(detail_calls.load(Ordering::SeqCst), 2);
        assert_eq!(list_calls.load(Ordering::SeqCst), 1);

        let mut list_observer = client.use_query(list.clone(), list_fetcher, options()).unwrap();
        list_observer.settled().await.unwrap();
        assert_eq!(list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_fetch_triggers_second_cycle() {
        let client = client();
        let (calls, fetcher) = counting(Duration::from_millis(50));
        let key = pledge_detail(7);

        let mut observer = client.use_query(key.clone(), fetcher.clone(), options()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = client.invalidate(&[pledge_detail(7)]).unwrap();
        assert_eq!(report.refetched, vec![key.clone()]);

        // A request issued after the invalidation sees the second cycle
        let data = client.fetch_query(&key, fetcher, options()).await.unwrap();
        assert_eq!(data["call"], 2);

        let snapshot = observer.settled().await.unwrap();
        assert_eq!(snapshot.data.unwrap()["call"], 2);
        assert!(!snapshot.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_supersedes_unobserved_fetch() {
        let client = client();
        let (calls, fetcher) = counting(Duration::from_millis(50));
        let key = pledge_detail(7);

        let first = tokio::spawn({
            let client = client.clone();
            let (key, fetcher) = (key.clone(), fetcher.clone());
            async move { client.fetch_query(&key, fetcher, options()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = client.invalidate(&[key.clone()]).unwrap();
        assert!(report.refetched.is_empty());
        assert_eq!(report.deferred, vec![key.clone()]);

        let data = client.fetch_query(&key, fetcher, options()).await.unwrap();
        assert_eq!(data["call"], 2);
        assert_eq!(first.await.unwrap().unwrap()["call"], 1);

        let snapshot = client.get_query(&key).unwrap();
        assert_eq!(snapshot.data.unwrap()["call"], 2);
        assert!(!snapshot.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unobserved_superseded_fetch_stays_stale() {
        let client = client();
        let (calls, fetcher) = counting(Duration::from_millis(50));
        let key = pledge_detail(7);

        let pending = tokio::spawn({
            let client = client.clone();
            let (key, fetcher) = (key.clone(), fetcher.clone());
            async move { client.fetch_query(&key, fetcher, options()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.invalidate(&[key.clone()]).unwrap();

        assert_eq!(pending.await.unwrap().unwrap()["call"], 1);
        let snapshot = client.get_query(&key).unwrap();
        assert_eq!(snapshot.data.unwrap()["call"], 1);
        assert!(snapshot.is_stale);
        // Nobody observes the key, so no second cycle runs on its own
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_mutation_invalidates_nothing() {
        let client = client();
        let (calls, fetcher) = counting(Duration::ZERO);
        let key = pledge_detail(7);
        client.fetch_query(&key, fetcher, options()).await.unwrap();

        let failing: Arc<dyn MutationFn> = Arc::new(|_input: Value| async {
            Err::<Value, _>(MutationFailure::rejected("pledge is cancelled"))
        });
        let mutation = client.use_mutation(
            MutationKind::CREATE_PAYMENT,
            failing,
            MutationOptions::default(),
        );

        let err = mutation.trigger(&payment_input(7, 3)).await.unwrap_err();
        assert!(matches!(err, QueryError::Mutation(_)));
        assert!(!client.get_query(&key).unwrap().is_stale);
        assert_eq!(client.stats().invalidations, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_success_keys_and_malformed_input() {
        let client = client();
        let (_, fetcher) = counting(Duration::ZERO);
        let settings = QueryKey::path(&["settings"]);
        let detail = pledge_detail(9);
        client.fetch_query(&settings, fetcher.clone(), options()).await.unwrap();
        client.fetch_query(&detail, fetcher.clone(), options()).await.unwrap();

        let with_extra = client.use_mutation(
            MutationKind::new("rename-campaign"),
            ok_mutation(),
            MutationOptions::on_success_keys([settings.clone()]),
        );
        let outcome = with_extra.trigger(&json!({ "name": "Spring" })).await.unwrap();
        assert_eq!(outcome.invalidation.invalidated, vec![settings.clone()]);

        // Rule cannot read the input: everything goes stale
        client.fetch_query(&settings, fetcher.clone(), options()).await.unwrap();
        let malformed = client.use_mutation(
            MutationKind::CREATE_PAYMENT,
            ok_mutation(),
            MutationOptions::default(),
        );
        let outcome = malformed.trigger(&json!({ "pledge": 9 })).await.unwrap();
        assert_eq!(outcome.invalidation.prefixes, vec![QueryKey::root()]);
        assert_eq!(outcome.invalidation.invalidated.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_preserves_previous_data() {
        let client = client();
        let key = pledge_detail(7);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher: Arc<dyn QueryFetcher> = Arc::new(move |_key: QueryKey| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(json!({ "balance": 100 }))
                } else {
                    Err(FetchFailure::transport("connection reset"))
                }
            }
        });

        let mut observer = client.use_query(key.clone(), fetcher, options()).unwrap();
        observer.settled().await.unwrap();

        let err = observer.refetch().await.unwrap_err();
        assert!(err.is_retryable());

        let snapshot = observer.settled().await.unwrap();
        assert!(snapshot.is_error());
        assert_eq!(snapshot.data.unwrap()["balance"], 100);
        assert_eq!(snapshot.error.unwrap().message, "connection reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_changed_notifications() {
        let client = client();
        let (_, fetcher) = counting(Duration::from_millis(5));
        let mut observer = client.use_query(pledge_detail(7), fetcher, options()).unwrap();

        let mut saw_success = false;
        while !saw_success {
            let snapshot = observer.changed().await.unwrap();
            saw_success = snapshot.is_success();
        }
        assert_eq!(observer.key(), &pledge_detail(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_after_gc_is_dropped() {
        let client = client();
        let (calls, fetcher) = counting(Duration::from_secs(120));
        let key = pledge_detail(7);

        let observer = client.use_query(key.clone(), fetcher, options()).unwrap();
        drop(observer);

        // GC (60 s) fires before the fetch (120 s) completes
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(client.get_query(&key).is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(client.get_query(&key).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_and_clears() {
        let client = client();
        let (_, fetcher) = counting(Duration::from_millis(100));
        let key = pledge_detail(7);

        let mut observer = client.use_query(key.clone(), fetcher.clone(), options()).unwrap();
        client.shutdown().await;

        assert!(client.is_empty());
        assert!(client.is_shut_down());
        assert!(matches!(
            client.fetch_query(&key, fetcher.clone(), options()).await,
            Err(QueryError::ShuttingDown)
        ));
        assert!(matches!(
            client.use_query(key.clone(), fetcher, options()),
            Err(QueryError::ShuttingDown)
        ));
        // The drained completion may still be unseen; after it the channel is closed
        let _ = observer.changed().await;
        assert!(observer.changed().await.is_err());

        // Dropping the observer after shutdown is harmless
        drop(observer);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_on_slow_fetch() {
        let mut config = QueryConfig::default();
        config.client.drain_timeout_ms = 50;
        let client = QueryClient::new(&config);
        let (_, fetcher) = counting(Duration::from_secs(10));

        let _observer = client.use_query(pledge_detail(7), fetcher, options()).unwrap();
        let started = Instant::now();
        client.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(client.is_empty());
    }
}
