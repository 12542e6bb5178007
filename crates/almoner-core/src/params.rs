//! # Parameter Bags
//!
//! The filter state of a list or detail screen, lowered into a canonical
//! mapping that the query cache can hash, compare and prefix-match.
//!
//! ## Canonical Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UI filter state (any insertion order)                                 │
//! │    { page: 2, contactId: 3 }   { contactId: 3, page: 2 }               │
//! │                 │                         │                             │
//! │                 └───────────┬─────────────┘                             │
//! │                             ▼                                           │
//! │  ParamBag (BTreeMap ordered by ParamField declaration order)           │
//! │    contactId=3, page=2                                                 │
//! │                                                                         │
//! │  Field order: contactId, categoryId, pledgeId, status, method, search,│
//! │               dateFrom, dateTo, page, limit                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two bags are equal iff every field matches by value; serialization and
//! `Display` walk the fields in the fixed order above, so equal bags always
//! render identically.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{EntityId, PaymentMethod, PledgeStatus};
use crate::validation::{validate_date_range, validate_limit, validate_page, validate_search};

// =============================================================================
// Param Field
// =============================================================================

/// A filter field. Declaration order is the canonical serialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamField {
    ContactId,
    CategoryId,
    PledgeId,
    Status,
    Method,
    Search,
    DateFrom,
    DateTo,
    Page,
    Limit,
}

impl ParamField {
    /// Name used in keys and query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamField::ContactId => "contactId",
            ParamField::CategoryId => "categoryId",
            ParamField::PledgeId => "pledgeId",
            ParamField::Status => "status",
            ParamField::Method => "method",
            ParamField::Search => "search",
            ParamField::DateFrom => "dateFrom",
            ParamField::DateTo => "dateTo",
            ParamField::Page => "page",
            ParamField::Limit => "limit",
        }
    }
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Param Value
// =============================================================================

/// A concrete filter value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Date(NaiveDate),
    Text(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ParamValue::Date(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            ParamValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(v: NaiveDate) -> Self {
        ParamValue::Date(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<PledgeStatus> for ParamValue {
    fn from(v: PledgeStatus) -> Self {
        ParamValue::Text(v.as_str().to_string())
    }
}

// =============================================================================
// Param Bag
// =============================================================================

/// Ordered mapping of filter fields to values.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamBag(BTreeMap<ParamField, ParamValue>);

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: ParamField, value: impl Into<ParamValue>) -> Self {
        self.0.insert(field, value.into());
        self
    }

    /// Builder-style insert that skips `None`.
    pub fn with_opt<V: Into<ParamValue>>(self, field: ParamField, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(field, v),
            None => self,
        }
    }

    pub fn insert(&mut self, field: ParamField, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(field, value.into())
    }

    pub fn remove(&mut self, field: ParamField) -> Option<ParamValue> {
        self.0.remove(&field)
    }

    pub fn get(&self, field: ParamField) -> Option<&ParamValue> {
        self.0.get(&field)
    }

    /// Integer value of `field`, if present and an integer.
    pub fn get_int(&self, field: ParamField) -> Option<i64> {
        self.get(field).and_then(ParamValue::as_int)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Fields in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&ParamField, &ParamValue)> {
        self.0.iter()
    }

    /// True iff every field of `self` is present in `other` with an equal value.
    ///
    /// The empty bag is a subset of every bag.
    pub fn is_subset_of(&self, other: &ParamBag) -> bool {
        self.0
            .iter()
            .all(|(field, value)| other.0.get(field) == Some(value))
    }
}

impl FromIterator<(ParamField, ParamValue)> for ParamBag {
    fn from_iter<I: IntoIterator<Item = (ParamField, ParamValue)>>(iter: I) -> Self {
        ParamBag(iter.into_iter().collect())
    }
}

impl fmt::Display for ParamBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", field, value)?;
        }
        f.write_str("}")
    }
}

// =============================================================================
// Typed Filters
// =============================================================================

/// Filter state of the pledge list screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PledgeFilter {
    pub contact_id: Option<EntityId>,
    pub category_id: Option<EntityId>,
    pub status: Option<PledgeStatus>,
    pub search: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PledgeFilter {
    /// Validates the filter before it is turned into a query.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(page) = self.page {
            validate_page(page)?;
        }
        if let Some(limit) = self.limit {
            validate_limit(limit)?;
        }
        if let Some(ref search) = self.search {
            validate_search(search)?;
        }
        validate_date_range(self.date_from, self.date_to)
    }

    /// Lowers the filter into a parameter bag. Blank searches are dropped.
    pub fn to_params(&self) -> ParamBag {
        ParamBag::new()
            .with_opt(ParamField::ContactId, self.contact_id)
            .with_opt(ParamField::CategoryId, self.category_id)
            .with_opt(ParamField::Status, self.status)
            .with_opt(ParamField::Search, normalized_search(self.search.as_deref()))
            .with_opt(ParamField::DateFrom, self.date_from)
            .with_opt(ParamField::DateTo, self.date_to)
            .with_opt(ParamField::Page, self.page)
            .with_opt(ParamField::Limit, self.limit)
    }
}

/// Filter state of a payments table (scoped to a pledge or a contact).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFilter {
    pub method: Option<PaymentMethod>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaymentFilter {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(page) = self.page {
            validate_page(page)?;
        }
        if let Some(limit) = self.limit {
            validate_limit(limit)?;
        }
        validate_date_range(self.date_from, self.date_to)
    }

    pub fn to_params(&self) -> ParamBag {
        let method = self.method.map(|m| match m {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Check => "check",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
        });

        ParamBag::new()
            .with_opt(ParamField::Method, method)
            .with_opt(ParamField::DateFrom, self.date_from)
            .with_opt(ParamField::DateTo, self.date_to)
            .with_opt(ParamField::Page, self.page)
            .with_opt(ParamField::Limit, self.limit)
    }
}

fn normalized_search(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = ParamBag::new()
            .with(ParamField::Page, 2)
            .with(ParamField::ContactId, 3);
        let b = ParamBag::new()
            .with(ParamField::ContactId, 3)
            .with(ParamField::Page, 2);

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{contactId=3,page=2}");
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_subset() {
        let full = ParamBag::new()
            .with(ParamField::ContactId, 3)
            .with(ParamField::Page, 1);
        let partial = ParamBag::new().with(ParamField::ContactId, 3);
        let other = ParamBag::new().with(ParamField::ContactId, 4);

        assert!(partial.is_subset_of(&full));
        assert!(ParamBag::new().is_subset_of(&full));
        assert!(!full.is_subset_of(&partial));
        assert!(!other.is_subset_of(&full));
    }

    #[test]
    fn test_pledge_filter_lowering() {
        let filter = PledgeFilter {
            contact_id: Some(3),
            status: Some(PledgeStatus::Open),
            search: Some("   ".into()),
            page: Some(1),
            ..Default::default()
        };
        let params = filter.to_params();

        assert_eq!(params.len(), 3);
        assert_eq!(params.get(ParamField::Status), Some(&ParamValue::from("open")));
        assert!(params.get(ParamField::Search).is_none());
    }

    #[test]
    fn test_filter_validation() {
        let bad_page = PledgeFilter {
            page: Some(0),
            ..Default::default()
        };
        assert!(bad_page.validate().is_err());

        let inverted = PaymentFilter {
            date_from: NaiveDate::from_ymd_opt(2026, 5, 1),
            date_to: NaiveDate::from_ymd_opt(2026, 4, 1),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        assert!(PaymentFilter::default().validate().is_ok());
    }

    #[test]
    fn test_date_display() {
        let bag = ParamBag::new().with(
            ParamField::DateFrom,
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
        );
        assert_eq!(bag.to_string(), "{dateFrom=2026-01-02}");
    }
}
