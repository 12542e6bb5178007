//! # Validation Module
//!
//! Validation for list filters and mutation inputs.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Form / filter widgets                                        │
//! │  └── THIS MODULE: page ≥ 1, limit range, amounts, date ranges          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Query cache (almoner-query)                                  │
//! │  └── Trusts its inputs; keys are built from already-valid filters      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Server                                                       │
//! │  └── Authoritative checks (foreign keys, ownership)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use almoner_core::validation::{validate_page, validate_limit};
//!
//! assert!(validate_page(1).is_ok());
//! assert!(validate_page(0).is_err());
//! assert!(validate_limit(500).is_err());
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_PAGE_LIMIT, MAX_SEARCH_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Pagination
// =============================================================================

/// Pages are 1-based.
pub fn validate_page(page: i64) -> ValidationResult<()> {
    if page < 1 {
        return Err(ValidationError::OutOfRange {
            field: "page".to_string(),
            min: 1,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Page size must be within `1..=MAX_PAGE_LIMIT`.
pub fn validate_limit(limit: i64) -> ValidationResult<()> {
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_LIMIT,
        });
    }
    Ok(())
}

// =============================================================================
// Free Text
// =============================================================================

/// Validates a search string and returns it trimmed.
///
/// Empty is allowed (no filtering).
pub fn validate_search(search: &str) -> ValidationResult<String> {
    let search = search.trim();

    if search.chars().count() > MAX_SEARCH_LEN {
        return Err(ValidationError::TooLong {
            field: "search".to_string(),
            max: MAX_SEARCH_LEN,
        });
    }

    Ok(search.to_string())
}

/// Required free-text field (names, references).
pub fn validate_required(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

// =============================================================================
// Amounts and Dates
// =============================================================================

/// Pledges and payments must be strictly positive.
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Either bound may be open; when both are set, `from <= to`.
pub fn validate_date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> ValidationResult<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(ValidationError::InvertedRange {
            field: "date range".to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
