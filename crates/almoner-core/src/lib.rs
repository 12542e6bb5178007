//! # almoner-core: Pure Domain Logic for Almoner
//!
//! Domain types shared by the query cache and by whatever transport talks to
//! the server. Everything here is deterministic and free of I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Almoner Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Admin UI (tables, forms)                     │   │
//! │  │    Pledge list ──► Pledge detail ──► Record payment form        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ use_query / use_mutation              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 almoner-query (cache + invalidation)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ almoner-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  params   │  │ validation│  │   │
//! │  │   │  Pledge   │  │   Money   │  │ ParamBag  │  │   rules   │  │   │
//! │  │   │  Payment  │  │  Balance  │  │  Filters  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Contact, Pledge, Payment, PledgeDetail, Page)
//! - [`money`] - Money type with integer arithmetic
//! - [`params`] - Parameter bags and typed list filters
//! - [`inputs`] - Mutation inputs (create pledge, record payment, ...)
//! - [`error`] - Domain error types
//! - [`validation`] - Filter and input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use almoner_core::params::{ParamField, ParamValue, PledgeFilter};
//!
//! let filter = PledgeFilter {
//!     contact_id: Some(3),
//!     page: Some(2),
//!     ..Default::default()
//! };
//!
//! let params = filter.to_params();
//! assert_eq!(params.get(ParamField::ContactId), Some(&ParamValue::Int(3)));
//! assert_eq!(params.get(ParamField::Page), Some(&ParamValue::Int(2)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod inputs;
pub mod money;
pub mod params;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use inputs::{
    CreatePaymentInput, CreatePledgeInput, DeletePaymentInput, UpdatePledgeStatusInput,
};
pub use money::Money;
pub use params::{ParamBag, ParamField, ParamValue};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default page size for list screens.
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Largest page size a list query may ask for.
///
/// ## Business Reason
/// The admin tables paginate server-side; anything larger than this is a
/// bulk export, which has its own endpoint.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Longest free-text search accepted by list filters.
pub const MAX_SEARCH_LEN: usize = 100;
