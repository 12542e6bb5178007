//! # Error Types
//!
//! Domain-specific error types for almoner-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  almoner-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Filter / input validation failures             │
//! │                                                                         │
//! │  almoner-query errors (separate crate)                                 │
//! │  ├── FetchFailure     - Transport failure, stored on the cache entry   │
//! │  ├── MutationFailure  - Write failure, returned to the caller          │
//! │  └── QueryError       - Everything the client API can return           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → MutationFailure → UI             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::EntityId;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Contact not found: {0}")]
    ContactNotFound(EntityId),

    #[error("Pledge not found: {0}")]
    PledgeNotFound(EntityId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(EntityId),

    /// Payment references a pledge that belongs to a different contact.
    ///
    /// ## When This Occurs
    /// The record-payment form pre-fills the contact from the pledge; a stale
    /// form (pledge reassigned in another tab) can submit a mismatched pair.
    #[error("Pledge {pledge_id} belongs to contact {expected}, not {actual}")]
    ContactMismatch {
        pledge_id: EntityId,
        expected: EntityId,
        actual: EntityId,
    },

    /// Pledge is not in a state that accepts the operation.
    #[error("Pledge {pledge_id} is {status}, cannot perform operation")]
    InvalidPledgeStatus { pledge_id: EntityId, status: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Required { field: String },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must lie in {min}..={max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: String },

    #[error("{field} is not one of {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Date range whose start is after its end.
    #[error("{field}: start {from} is after end {to}")]
    InvertedRange {
        field: String,
        from: String,
        to: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::ContactMismatch {
            pledge_id: 7,
            expected: 3,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Pledge 7 belongs to contact 3, not 4");

        let err = ValidationError::OutOfRange {
            field: "page".into(),
            min: 1,
            max: i64::MAX,
        };
        assert!(err.to_string().starts_with("page must lie in 1..="));
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "amount".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
