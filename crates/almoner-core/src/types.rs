//! # Domain Types
//!
//! Entities the admin application reads and writes.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Contact      │   │     Pledge      │   │    Payment      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │◄──│  contact_id     │◄──│  pledge_id      │       │
//! │  │  display_name   │   │  category_id    │   │  contact_id     │       │
//! │  │  email          │   │  amount         │   │  amount         │       │
//! │  └─────────────────┘   │  status         │   │  method         │       │
//! │                        │  plan (opt.)    │   │  paid_on        │       │
//! │  ┌─────────────────┐   └─────────────────┘   └─────────────────┘       │
//! │  │    Category     │                                                    │
//! │  │  id, name       │   PledgeDetail = Pledge + Payments + balance      │
//! │  └─────────────────┘   Page<T>      = one page of a list query         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers are the server's integer primary keys; they are also what the
//! query cache puts into its keys (`pledgeId = 7`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

/// Server-side primary key.
pub type EntityId = i64;

// =============================================================================
// Contact
// =============================================================================

/// A donor or member who makes pledges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: EntityId,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Category
// =============================================================================

/// A pledge category (building fund, annual campaign, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: EntityId,
    pub name: String,
}

// =============================================================================
// Pledge Status
// =============================================================================

/// Lifecycle of a pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStatus {
    /// Pledged, balance outstanding.
    #[default]
    Open,
    /// Fully paid.
    Fulfilled,
    /// Withdrawn by the contact or written off.
    Cancelled,
}

impl PledgeStatus {
    /// Stable string used in filters and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PledgeStatus::Open => "open",
            PledgeStatus::Fulfilled => "fulfilled",
            PledgeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PledgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PledgeStatus {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(PledgeStatus::Open),
            "fulfilled" | "paid" => Ok(PledgeStatus::Fulfilled),
            "cancelled" | "canceled" => Ok(PledgeStatus::Cancelled),
            _ => Err(crate::error::ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: vec!["open".into(), "fulfilled".into(), "cancelled".into()],
            }),
        }
    }
}

// =============================================================================
// Payment Plan
// =============================================================================

/// How often installments fall due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl PaymentFrequency {
    /// Months between installments; weekly plans return `None`.
    pub fn months(&self) -> Option<u32> {
        match self {
            PaymentFrequency::Weekly => None,
            PaymentFrequency::Monthly => Some(1),
            PaymentFrequency::Quarterly => Some(3),
            PaymentFrequency::Yearly => Some(12),
        }
    }
}

/// An installment schedule attached to a pledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPlan {
    pub frequency: PaymentFrequency,
    pub installments: u32,
    #[ts(as = "String")]
    pub starts_on: NaiveDate,
}

impl PaymentPlan {
    /// Due date of the zero-based installment `index`.
    pub fn due_date(&self, index: u32) -> Option<NaiveDate> {
        if index >= self.installments {
            return None;
        }

        match self.frequency.months() {
            Some(months) => self
                .starts_on
                .checked_add_months(chrono::Months::new(months * index)),
            None => self
                .starts_on
                .checked_add_days(chrono::Days::new(7 * u64::from(index))),
        }
    }
}

// =============================================================================
// Pledge
// =============================================================================

/// A commitment by a contact to give an amount, optionally in installments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Pledge {
    pub id: EntityId,
    pub contact_id: EntityId,
    pub category_id: Option<EntityId>,
    pub amount: Money,
    /// Sum of recorded payments; maintained by the server.
    pub paid: Money,
    pub status: PledgeStatus,
    pub plan: Option<PaymentPlan>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub pledged_on: NaiveDate,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Pledge {
    /// Outstanding balance (negative when overpaid).
    #[inline]
    pub fn balance(&self) -> Money {
        self.amount - self.paid
    }

    /// Whether a payment of `amount` would settle the pledge.
    pub fn is_settled_by(&self, amount: Money) -> bool {
        amount >= self.balance()
    }
}

// =============================================================================
// Payment
// =============================================================================

/// How a payment was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Check,
    Card,
    BankTransfer,
}

/// A payment recorded against a pledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: EntityId,
    pub pledge_id: EntityId,
    pub contact_id: EntityId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Check number, card authorization code, ...
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub paid_on: NaiveDate,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Read Models
// =============================================================================

/// Pledge detail screen: the pledge, its payments and derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PledgeDetail {
    pub pledge: Pledge,
    pub contact: Contact,
    pub payments: Vec<Payment>,
}

impl PledgeDetail {
    /// Total of the listed payments.
    pub fn total_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// Outstanding balance computed from the listed payments.
    pub fn balance(&self) -> Money {
        self.pledge.amount - self.total_paid()
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    /// Number of pages given `total` and `limit`.
    pub fn page_count(&self) -> i64 {
        if self.limit <= 0 {
            return 0;
        }
        (self.total + self.limit - 1) / self.limit
    }

    pub fn has_next(&self) -> bool {
        self.page < self.page_count()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pledge(amount: i64, paid: i64) -> Pledge {
        Pledge {
            id: 7,
            contact_id: 3,
            category_id: None,
            amount: Money::from_cents(amount),
            paid: Money::from_cents(paid),
            status: PledgeStatus::Open,
            plan: None,
            notes: None,
            pledged_on: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pledge_balance() {
        let p = pledge(100_000, 25_000);
        assert_eq!(p.balance().cents(), 75_000);
        assert!(p.is_settled_by(Money::from_cents(75_000)));
        assert!(!p.is_settled_by(Money::from_cents(74_999)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("open".parse::<PledgeStatus>().unwrap(), PledgeStatus::Open);
        assert_eq!("Paid".parse::<PledgeStatus>().unwrap(), PledgeStatus::Fulfilled);
        assert_eq!("canceled".parse::<PledgeStatus>().unwrap(), PledgeStatus::Cancelled);
        assert!("pending".parse::<PledgeStatus>().is_err());
        assert_eq!(PledgeStatus::default(), PledgeStatus::Open);
    }

    #[test]
    fn test_plan_due_dates() {
        let plan = PaymentPlan {
            frequency: PaymentFrequency::Quarterly,
            installments: 4,
            starts_on: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        };
        assert_eq!(plan.due_date(1), NaiveDate::from_ymd_opt(2026, 4, 30));
        assert_eq!(plan.due_date(4), None);

        let weekly = PaymentPlan {
            frequency: PaymentFrequency::Weekly,
            installments: 3,
            starts_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        assert_eq!(weekly.due_date(2), NaiveDate::from_ymd_opt(2026, 3, 15));
    }

    #[test]
    fn test_page_count() {
        let page: Page<Category> = Page {
            items: vec![],
            total: 41,
            page: 2,
            limit: 20,
        };
        assert_eq!(page.page_count(), 3);
        assert!(page.has_next());
    }

    #[test]
    fn test_pledge_serializes_camel_case() {
        let json = serde_json::to_value(pledge(500, 0)).unwrap();
        assert_eq!(json["contactId"], 3);
        assert_eq!(json["status"], "open");
    }
}
