//! # Mutation Inputs
//!
//! Payloads of the write operations the admin screens perform. The query
//! cache's invalidation rules read the ids out of these (after they have been
//! serialized into a mutation record), so field names are part of the
//! contract: `contactId`, `pledgeId`, `categoryId`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{EntityId, PaymentMethod, PaymentPlan, PledgeStatus};
use crate::validation::{validate_amount, validate_required, ValidationResult};

/// "New pledge" form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CreatePledgeInput {
    pub contact_id: EntityId,
    #[serde(default)]
    pub category_id: Option<EntityId>,
    pub amount: Money,
    #[serde(default)]
    pub plan: Option<PaymentPlan>,
    #[serde(default)]
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub pledged_on: NaiveDate,
}

impl CreatePledgeInput {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_amount("amount", self.amount)?;
        if let Some(ref plan) = self.plan {
            if plan.installments == 0 {
                return Err(ValidationError::MustBePositive {
                    field: "installments".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// "Record payment" form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentInput {
    pub pledge_id: EntityId,
    pub contact_id: EntityId,
    pub amount: Money,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub paid_on: NaiveDate,
}

impl CreatePaymentInput {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_amount("amount", self.amount)?;
        // Checks must carry the check number.
        if self.method == PaymentMethod::Check {
            validate_required("reference", self.reference.as_deref().unwrap_or(""), 64)?;
        }
        Ok(())
    }
}

/// Status change from the pledge detail screen (cancel, mark fulfilled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePledgeStatusInput {
    pub pledge_id: EntityId,
    pub contact_id: EntityId,
    pub status: PledgeStatus,
}

/// Removal of a mistakenly recorded payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DeletePaymentInput {
    pub payment_id: EntityId,
    pub pledge_id: EntityId,
    pub contact_id: EntityId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(method: PaymentMethod, reference: Option<&str>) -> CreatePaymentInput {
        CreatePaymentInput {
            pledge_id: 7,
            contact_id: 3,
            amount: Money::from_cents(2_500),
            method,
            reference: reference.map(str::to_string),
            paid_on: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
        }
    }

    #[test]
    fn test_check_requires_reference() {
        assert!(payment(PaymentMethod::Cash, None).validate().is_ok());
        assert!(payment(PaymentMethod::Check, None).validate().is_err());
        assert!(payment(PaymentMethod::Check, Some("1042")).validate().is_ok());
    }

    #[test]
    fn test_payment_ids_serialize_camel_case() {
        let json = serde_json::to_value(payment(PaymentMethod::Card, None)).unwrap();
        assert_eq!(json["pledgeId"], 7);
        assert_eq!(json["contactId"], 3);
    }

    #[test]
    fn test_pledge_optional_fields_default() {
        let input: CreatePledgeInput = serde_json::from_value(serde_json::json!({
            "contactId": 3,
            "amount": 10000,
            "pledgedOn": "2026-01-01"
        }))
        .unwrap();
        assert_eq!(input.category_id, None);
        assert!(input.validate().is_ok());
    }
}
