//! # almoner-query: Data-Sync Query Cache for Almoner
//!
//! Keyed cache of server reads for the admin UI. Deduplicates concurrent
//! fetches, tracks freshness, evicts what nobody watches, and turns
//! successful writes into targeted invalidations.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Query Cache Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   QueryClient (explicit context)                 │  │
//! │  │   use_query ─► QueryObserver      use_mutation ─► MutationHandle │  │
//! │  └────────┬──────────────────────┬──────────────────────┬───────────┘  │
//! │           ▼                      ▼                      ▼              │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐    │
//! │  │FetchCoordinator│  │SubscriptionManager │  │ InvalidationEngine │    │
//! │  │                │  │                    │  │                    │    │
//! │  │ one fetch per  │  │ subscriber counts  │  │ mutation kind ─►   │    │
//! │  │ key in flight, │  │ GC timers          │  │ key prefixes,      │    │
//! │  │ generations    │  │                    │  │ eager refetch      │    │
//! │  └───────┬────────┘  └─────────┬──────────┘  └─────────┬──────────┘    │
//! │          └─────────────────────┼───────────────────────┘               │
//! │                                ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        CacheStore  (QueryKey → CacheEntry, one mutex)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                ▲                                        │
//! │                                │ QueryFetcher / MutationFn              │
//! │  ┌─────────────────────────────┴───────────────────────────────────┐   │
//! │  │              EntityTransport (server API, supplied)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`key`] - Hierarchical query keys and the entity key families
//! - [`store`] - Cache entries, snapshots, options
//! - [`fetch`] - Fetch coordinator with in-flight dedup
//! - [`subscription`] - Subscriber counts and GC
//! - [`invalidation`] - Mutation kinds, rule table, invalidation engine
//! - [`client`] - `QueryClient`, observers and mutation handles
//! - [`transport`] - Fetcher / mutation seams to the server
//! - [`config`] - Cache configuration (TOML + environment)
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use almoner_query::{pledge_detail, QueryClient, QueryConfig, TransportFetcher};
//!
//! let client = QueryClient::new(&QueryConfig::load_or_default(None));
//! let fetcher = Arc::new(TransportFetcher::new(transport.clone()));
//!
//! let mut detail = client.use_query(pledge_detail(7), fetcher, client.default_options())?;
//! let snapshot = detail.settled().await?;
//! println!("Balance: {:?}", snapshot.data);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod invalidation;
pub mod key;
pub mod store;
pub mod subscription;
pub mod transport;

mod state;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{MutationHandle, MutationOptions, MutationOutcome, QueryClient, QueryObserver};
pub use config::{CacheSettings, ClientSettings, QueryConfig};
pub use error::{FailureKind, FetchFailure, MutationFailure, QueryError, QueryResult};
pub use invalidation::{InvalidationReport, InvalidationTable, MutationKind, MutationRecord};
pub use key::{
    build_key, payments_by_contact, payments_by_pledge, pledge_detail, pledge_list,
    EntityFamily, KeySegment, QueryKey,
};
pub use state::CacheStatsSnapshot;
pub use store::{FetchStatus, QueryOptions, QuerySnapshot, QueryStatus};
pub use subscription::SubscriptionHandle;
pub use transport::{EntityTransport, MutationFn, QueryFetcher, TransportFetcher, TransportMutation};
