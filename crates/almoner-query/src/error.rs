//! # Query Error Types
//!
//! Error types for the query cache.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Query Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Value errors   │  │   Client API    │  │     Configuration       │ │
//! │  │  (Clone)        │  │                 │  │                         │ │
//! │  │  FetchFailure   │  │  Fetch          │  │  InvalidConfig          │ │
//! │  │  MutationFailure│  │  Mutation       │  │  ConfigLoadFailed       │ │
//! │  │                 │  │  DecodeFailed   │  │  ConfigSaveFailed       │ │
//! │  │  stored on the  │  │  NotCached      │  │                         │ │
//! │  │  entry, shared  │  │  NoFetcher      │  │                         │ │
//! │  │  by all callers │  │  ShuttingDown   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ConsistencyViolation is a defect: logged at error level, never shown  │
//! │  to the user as a snapshot state.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for query cache operations.
pub type QueryResult<T> = Result<T, QueryError>;

// =============================================================================
// Failure Kind
// =============================================================================

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureKind {
    /// Network error, connection reset, timeout.
    Transport,
    /// The server answered with a non-success status.
    Server { status: u16 },
    /// The entity does not exist (any more).
    NotFound,
    /// The key could not be turned into a transport request.
    InvalidKey,
    /// The server refused the write (validation, business rule).
    Rejected,
    /// The operation was abandoned before it completed.
    Cancelled,
    /// The client was shut down while the operation was running.
    ShuttingDown,
}

impl FailureKind {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Transport => true,
            FailureKind::Server { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// =============================================================================
// Fetch Failure
// =============================================================================

/// A failed read.
///
/// Stored on the cache entry and handed to every caller attached to the fetch,
/// so it is a cheap `Clone` value rather than a boxed error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        FetchFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Server { status }, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidKey, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "fetch was cancelled")
    }

    pub fn shutting_down() -> Self {
        Self::new(FailureKind::ShuttingDown, "query client is shutting down")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

// =============================================================================
// Mutation Failure
// =============================================================================

/// A failed write. Returned to the caller; nothing is invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct MutationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl MutationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        MutationFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Server { status }, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

// =============================================================================
// Query Error
// =============================================================================

/// Everything the client API can return.
#[derive(Debug, Error)]
pub enum QueryError {
    // =========================================================================
    // Operation Errors
    // =========================================================================
    /// A fetch attached to by this call failed.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchFailure),

    /// The mutation function failed.
    #[error("Mutation failed: {0}")]
    Mutation(#[from] MutationFailure),

    /// A mutation input did not have the shape its invalidation rule expects.
    #[error("Invalid input for mutation {kind}: {reason}")]
    InvalidMutationInput { kind: String, reason: String },

    /// Cached data could not be decoded into the requested type.
    #[error("Failed to decode cached data for {key}: {reason}")]
    DecodeFailed { key: String, reason: String },

    /// A value could not be serialized for the cache or a mutation record.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// No entry exists for the key.
    #[error("No cached query for {0}")]
    NotCached(String),

    /// A refetch was requested for an entry no observer has given a fetcher.
    #[error("No fetcher registered for {0}")]
    NoFetcher(String),

    /// The operation needs a tokio runtime and none is running.
    #[error("No tokio runtime available")]
    NoRuntime,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid query configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// An internal invariant was breached.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// The client has been shut down.
    #[error("Query client is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for QueryError {
    fn from(err: toml::de::Error) -> Self {
        QueryError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for QueryError {
    fn from(err: toml::ser::Error) -> Self {
        QueryError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl QueryError {
    /// Returns true if repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Fetch(f) => f.is_retryable(),
            QueryError::Mutation(f) => f.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidConfig(_)
                | QueryError::ConfigLoadFailed(_)
                | QueryError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_failures() {
        assert!(FetchFailure::transport("connection reset").is_retryable());
        assert!(FetchFailure::server(503, "unavailable").is_retryable());
        assert!(FetchFailure::server(429, "slow down").is_retryable());

        assert!(!FetchFailure::server(400, "bad request").is_retryable());
        assert!(!FetchFailure::not_found("pledge 7").is_retryable());
        assert!(!MutationFailure::rejected("amount must be positive").is_retryable());
    }

    #[test]
    fn test_query_error_wraps_failures() {
        let err: QueryError = FetchFailure::transport("timeout").into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Fetch failed: timeout");

        let err: QueryError = MutationFailure::server(500, "boom").into();
        assert!(matches!(err, QueryError::Mutation(_)));
    }

    #[test]
    fn test_failure_serializes_kind() {
        let json = serde_json::to_value(FetchFailure::server(502, "bad gateway")).unwrap();
        assert_eq!(json["kind"]["kind"], "server");
        assert_eq!(json["kind"]["status"], 502);
    }

    #[test]
    fn test_config_errors() {
        assert!(QueryError::InvalidConfig("gc".into()).is_config_error());
        assert!(!QueryError::ShuttingDown.is_config_error());
    }
}
