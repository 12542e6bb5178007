//! # Transport Seams
//!
//! The cache never talks HTTP itself. Reads go through a [`QueryFetcher`],
//! writes through a [`MutationFn`]; both are plain async closures in the
//! common case.
//!
//! ## Adapters
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   QueryKey ──decode──► (EntityFamily, ParamBag)                        │
//! │                                   │                                     │
//! │   TransportFetcher<T> ────────────┴──► T::fetch_entities(..)           │
//! │                                                                         │
//! │   MutationKind + input ─────────────► T::perform_mutation(..)          │
//! │   TransportMutation<T>                                                 │
//! │                                                                         │
//! │   T: EntityTransport  (HTTP client in the app, in-memory in tests)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use almoner_core::ParamBag;
use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::{FetchFailure, MutationFailure};
use crate::invalidation::MutationKind;
use crate::key::{EntityFamily, QueryKey};

// =============================================================================
// Fetcher
// =============================================================================

/// Produces the data for a key. Called at most once per started fetch and
/// never while the cache lock is held.
pub trait QueryFetcher: Send + Sync + 'static {
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<Value, FetchFailure>>;
}

impl<F, Fut> QueryFetcher for F
where
    F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchFailure>> + Send + 'static,
{
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<Value, FetchFailure>> {
        (self)(key.clone()).boxed()
    }
}

// =============================================================================
// Mutation Function
// =============================================================================

/// Performs a write and returns the server's result.
pub trait MutationFn: Send + Sync + 'static {
    fn mutate(&self, input: Value) -> BoxFuture<'static, Result<Value, MutationFailure>>;
}

impl<F, Fut> MutationFn for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MutationFailure>> + Send + 'static,
{
    fn mutate(&self, input: Value) -> BoxFuture<'static, Result<Value, MutationFailure>> {
        (self)(input).boxed()
    }
}

// =============================================================================
// Entity Transport
// =============================================================================

/// The server API as the cache sees it. No retries happen at this level.
pub trait EntityTransport: Send + Sync + 'static {
    fn fetch_entities(
        &self,
        family: EntityFamily,
        params: ParamBag,
    ) -> BoxFuture<'static, Result<Value, FetchFailure>>;

    fn perform_mutation(
        &self,
        kind: &MutationKind,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, MutationFailure>>;
}

/// Fetcher that decodes keys and forwards them to a transport.
pub struct TransportFetcher<T> {
    transport: Arc<T>,
}

impl<T: EntityTransport> TransportFetcher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        TransportFetcher { transport }
    }
}

impl<T: EntityTransport> QueryFetcher for TransportFetcher<T> {
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<Value, FetchFailure>> {
        match key.decode() {
            Some((family, params)) => self.transport.fetch_entities(family, params),
            None => future::ready(Err(FetchFailure::invalid_key(format!(
                "{} does not name an entity family",
                key
            ))))
            .boxed(),
        }
    }
}

/// Mutation function bound to one mutation kind of a transport.
pub struct TransportMutation<T> {
    transport: Arc<T>,
    kind: MutationKind,
}

impl<T: EntityTransport> TransportMutation<T> {
    pub fn new(transport: Arc<T>, kind: MutationKind) -> Self {
        TransportMutation { transport, kind }
    }
}

impl<T: EntityTransport> MutationFn for TransportMutation<T> {
    fn mutate(&self, input: Value) -> BoxFuture<'static, Result<Value, MutationFailure>> {
        self.transport.perform_mutation(&self.kind, input)
    }
}
