//! # Invalidation Engine
//!
//! Turns a successful mutation into the set of cached reads it may have made
//! wrong, marks them stale, and refetches the ones somebody is looking at.
//!
//! ## Rule Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  mutation kind         input fields         affected prefixes           │
//! │  ────────────────────  ───────────────────  ────────────────────────    │
//! │  create-pledge         contactId            [pledges, list]             │
//! │                        categoryId?          [.., list, {contactId}]     │
//! │                                             [.., list, {categoryId}]    │
//! │                                                                         │
//! │  create-payment        pledgeId             [payments, byPledge, p]     │
//! │  delete-payment        contactId            [payments, byContact, c]    │
//! │                                             [pledges, list]             │
//! │                                             [pledges, detail, p]        │
//! │                                                                         │
//! │  update-pledge-status  pledgeId             [pledges, list]             │
//! │                                             [pledges, detail, p]        │
//! │                                                                         │
//! │  unknown kind          -                    (nothing)                   │
//! │  malformed input       -                    [] (root: everything)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! Every entry under an affected prefix is marked stale. Entries with
//! subscribers are refetched right away (or, if a fetch is already running,
//! that fetch is superseded and a second cycle follows it); the rest are
//! refreshed lazily the next time someone asks for them.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use almoner_core::{
    CreatePaymentInput, CreatePledgeInput, DeletePaymentInput, EntityId, ParamBag, ParamField,
    UpdatePledgeStatusInput,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueryError, QueryResult};
use crate::fetch::FetchCoordinator;
use crate::key::{pledge_detail, pledge_list, EntityFamily, QueryKey};
use crate::state::{CacheStats, QueryCore};

// =============================================================================
// Mutation Records
// =============================================================================

/// Name of a write operation, e.g. `create-payment`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationKind(Cow<'static, str>);

impl MutationKind {
    pub const CREATE_PLEDGE: MutationKind = MutationKind(Cow::Borrowed("create-pledge"));
    pub const CREATE_PAYMENT: MutationKind = MutationKind(Cow::Borrowed("create-payment"));
    pub const UPDATE_PLEDGE_STATUS: MutationKind =
        MutationKind(Cow::Borrowed("update-pledge-status"));
    pub const DELETE_PAYMENT: MutationKind = MutationKind(Cow::Borrowed("delete-payment"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        MutationKind(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A completed write, consumed once by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    /// Correlates log lines for one write.
    pub id: Uuid,
    pub kind: MutationKind,
    pub input: Value,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

impl MutationRecord {
    pub fn new(kind: MutationKind, input: Value, result: Value) -> Self {
        MutationRecord {
            id: Uuid::new_v4(),
            kind,
            input,
            result,
            completed_at: Utc::now(),
        }
    }

    /// Decodes the input as the payload type of this mutation kind.
    pub fn input_as<T: DeserializeOwned>(&self) -> QueryResult<T> {
        T::deserialize(&self.input).map_err(|e| QueryError::InvalidMutationInput {
            kind: self.kind.to_string(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Rule Table
// =============================================================================

/// Derives affected prefixes from a mutation record.
pub type InvalidationRule =
    Arc<dyn Fn(&MutationRecord) -> QueryResult<Vec<QueryKey>> + Send + Sync + 'static>;

/// Declarative mapping of mutation kind → rule.
#[derive(Clone, Default)]
pub struct InvalidationTable {
    rules: HashMap<MutationKind, InvalidationRule>,
}

impl InvalidationTable {
    /// An empty table: every mutation affects nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the pledge and payment screens.
    pub fn standard() -> Self {
        Self::new()
            .with_rule(MutationKind::CREATE_PLEDGE, |record| {
                let input: CreatePledgeInput = record.input_as()?;
                Ok(create_pledge_prefixes(input.contact_id, input.category_id))
            })
            .with_rule(MutationKind::CREATE_PAYMENT, |record| {
                let input: CreatePaymentInput = record.input_as()?;
                Ok(payment_prefixes(input.pledge_id, input.contact_id))
            })
            .with_rule(MutationKind::DELETE_PAYMENT, |record| {
                let input: DeletePaymentInput = record.input_as()?;
                Ok(payment_prefixes(input.pledge_id, input.contact_id))
            })
            .with_rule(MutationKind::UPDATE_PLEDGE_STATUS, |record| {
                let input: UpdatePledgeStatusInput = record.input_as()?;
                Ok(vec![pledge_list(ParamBag::new()), pledge_detail(input.pledge_id)])
            })
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_rule<F>(mut self, kind: MutationKind, rule: F) -> Self
    where
        F: Fn(&MutationRecord) -> QueryResult<Vec<QueryKey>> + Send + Sync + 'static,
    {
        self.register(kind, rule);
        self
    }

    /// Adds or replaces the rule for `kind`.
    pub fn register<F>(&mut self, kind: MutationKind, rule: F)
    where
        F: Fn(&MutationRecord) -> QueryResult<Vec<QueryKey>> + Send + Sync + 'static,
    {
        self.rules.insert(kind, Arc::new(rule));
    }

    pub fn contains(&self, kind: &MutationKind) -> bool {
        self.rules.contains_key(kind)
    }

    /// Prefixes affected by `record`. Unknown kinds affect nothing.
    pub fn affected_prefixes(&self, record: &MutationRecord) -> QueryResult<Vec<QueryKey>> {
        match self.rules.get(&record.kind) {
            Some(rule) => rule(record),
            None => {
                debug!(kind = %record.kind, "No invalidation rule for mutation kind");
                Ok(Vec::new())
            }
        }
    }
}

impl fmt::Debug for InvalidationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.rules.keys().map(MutationKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("InvalidationTable").field("kinds", &kinds).finish()
    }
}

fn create_pledge_prefixes(contact_id: EntityId, category_id: Option<EntityId>) -> Vec<QueryKey> {
    let mut prefixes = vec![
        pledge_list(ParamBag::new()),
        pledge_list(ParamBag::new().with(ParamField::ContactId, contact_id)),
    ];
    if let Some(category_id) = category_id {
        prefixes.push(pledge_list(
            ParamBag::new().with(ParamField::CategoryId, category_id),
        ));
    }
    prefixes
}

fn payment_prefixes(pledge_id: EntityId, contact_id: EntityId) -> Vec<QueryKey> {
    vec![
        EntityFamily::PaymentsByPledge.root().with_id(pledge_id),
        EntityFamily::PaymentsByContact.root().with_id(contact_id),
        pledge_list(ParamBag::new()),
        pledge_detail(pledge_id),
    ]
}

// =============================================================================
// Invalidation Engine
// =============================================================================

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    /// Prefixes that were applied.
    pub prefixes: Vec<QueryKey>,
    /// Every cached key that was marked stale.
    pub invalidated: Vec<QueryKey>,
    /// Marked keys with subscribers, now refetching.
    pub refetched: Vec<QueryKey>,
    /// Marked keys left stale until somebody asks for them.
    pub deferred: Vec<QueryKey>,
}

/// Applies mutation consequences to the cache.
pub struct InvalidationEngine {
    core: Arc<QueryCore>,
}

impl InvalidationEngine {
    pub(crate) fn new(core: Arc<QueryCore>) -> Self {
        InvalidationEngine { core }
    }

    /// Invalidates everything `record` affects, plus `extra` prefixes.
    ///
    /// If the rule for a known kind cannot read the input, the whole cache is
    /// invalidated instead.
    pub fn on_mutation_success(
        &self,
        record: &MutationRecord,
        extra: &[QueryKey],
    ) -> QueryResult<InvalidationReport> {
        let mut prefixes = match self.core.rules.affected_prefixes(record) {
            Ok(prefixes) => prefixes,
            Err(e) => {
                warn!(
                    mutation = %record.id,
                    kind = %record.kind,
                    error = %e,
                    "Invalidation rule failed, invalidating entire cache"
                );
                vec![QueryKey::root()]
            }
        };
        prefixes.extend(extra.iter().cloned());

        let report = self.invalidate(prefixes)?;
        info!(
            mutation = %record.id,
            kind = %record.kind,
            invalidated = report.invalidated.len(),
            refetched = report.refetched.len(),
            deferred = report.deferred.len(),
            "Mutation applied to cache"
        );
        Ok(report)
    }

    /// Marks every entry under `prefixes` stale and refetches observed ones.
    pub fn invalidate(&self, mut prefixes: Vec<QueryKey>) -> QueryResult<InvalidationReport> {
        prefixes.sort();
        prefixes.dedup();

        let coordinator = FetchCoordinator::new(Arc::clone(&self.core));
        let mut state = self.core.lock();
        if state.closed {
            return Err(QueryError::ShuttingDown);
        }

        let keys = state.store.keys_matching(&prefixes);
        let mut report = InvalidationReport {
            prefixes,
            ..Default::default()
        };

        for key in keys {
            let Some(entry) = state.store.get_mut(&key) else {
                continue;
            };
            entry.invalidated = true;

            let subscribed = entry.subscriber_count > 0;
            let mut observed = false;
            let refetch_with = if let Some(ref mut in_flight) = entry.in_flight {
                // Result of the running fetch predates this write
                in_flight.superseded = true;
                observed = subscribed;
                None
            } else if subscribed {
                entry.fetcher.clone()
            } else {
                None
            };
            observed |= refetch_with.is_some();
            entry.publish();

            if let Some(fetcher) = refetch_with {
                coordinator.start_locked(&mut state, &key, fetcher)?;
            }

            if observed {
                report.refetched.push(key.clone());
            } else {
                report.deferred.push(key.clone());
            }
            report.invalidated.push(key);
        }

        CacheStats::add(&self.core.stats.invalidations, report.invalidated.len());
        CacheStats::add(&self.core.stats.refetches, report.refetched.len());
        debug!(
            prefixes = report.prefixes.len(),
            invalidated = report.invalidated.len(),
            "Invalidation pass complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{payments_by_contact, payments_by_pledge};
    use almoner_core::{Money, PaymentMethod};
    use chrono::NaiveDate;
    use serde_json::json;

    fn create_payment_record(pledge_id: EntityId, contact_id: EntityId) -> MutationRecord {
        let input = CreatePaymentInput {
            pledge_id,
            contact_id,
            amount: Money::from_cents(2_500),
            method: PaymentMethod::Cash,
            reference: None,
            paid_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        MutationRecord::new(
            MutationKind::CREATE_PAYMENT,
            serde_json::to_value(input).unwrap(),
            json!({"id": 99}),
        )
    }

    #[test]
    fn test_create_payment_prefixes() {
        let table = InvalidationTable::standard();
        let prefixes = table.affected_prefixes(&create_payment_record(7, 3)).unwrap();

        assert_eq!(
            prefixes,
            vec![
                QueryKey::path(&["payments", "byPledge"]).with_id(7),
                QueryKey::path(&["payments", "byContact"]).with_id(3),
                QueryKey::path(&["pledges", "list"]),
                QueryKey::path(&["pledges", "detail"]).with_id(7),
            ]
        );
        assert!(prefixes[0].is_prefix_of(&payments_by_pledge(
            7,
            ParamBag::new().with(ParamField::Page, 1)
        )));
        assert!(!prefixes[1].is_prefix_of(&payments_by_contact(4, ParamBag::new())));
    }

    #[test]
    fn test_create_pledge_prefixes() {
        let table = InvalidationTable::standard();
        let record = MutationRecord::new(
            MutationKind::CREATE_PLEDGE,
            json!({"contactId": 3, "categoryId": 5, "amount": 10000, "pledgedOn": "2026-01-01"}),
            Value::Null,
        );
        let prefixes = table.affected_prefixes(&record).unwrap();

        assert_eq!(prefixes.len(), 3);
        assert_eq!(prefixes[1].to_string(), "[pledges, list, {contactId=3}]");
        assert_eq!(prefixes[2].to_string(), "[pledges, list, {categoryId=5}]");

        let without_category = MutationRecord::new(
            MutationKind::CREATE_PLEDGE,
            json!({"contactId": 3, "amount": 10000, "pledgedOn": "2026-01-01"}),
            Value::Null,
        );
        assert_eq!(table.affected_prefixes(&without_category).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_kind_affects_nothing() {
        let table = InvalidationTable::standard();
        let record = MutationRecord::new(MutationKind::new("archive-contact"), json!({}), json!({}));
        assert!(table.affected_prefixes(&record).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        let table = InvalidationTable::standard();
        let record = MutationRecord::new(
            MutationKind::CREATE_PAYMENT,
            json!({"pledgeId": "seven"}),
            json!({}),
        );
        let err = table.affected_prefixes(&record).unwrap_err();
        assert!(matches!(err, QueryError::InvalidMutationInput { .. }));
    }

    #[test]
    fn test_custom_rule_registration() {
        let table = InvalidationTable::new().with_rule(MutationKind::new("merge-contacts"), |_| {
            Ok(vec![QueryKey::path(&["pledges"])])
        });
        assert!(table.contains(&MutationKind::new("merge-contacts")));
        assert!(!table.contains(&MutationKind::CREATE_PAYMENT));
        assert_eq!(format!("{:?}", table), r#"InvalidationTable { kinds: ["merge-contacts"] }"#);
    }

    #[test]
    fn test_mutation_kind_serializes_as_string() {
        assert_eq!(
            serde_json::to_value(MutationKind::DELETE_PAYMENT).unwrap(),
            json!("delete-payment")
        );
        assert_eq!(MutationKind::new("create-payment"), MutationKind::CREATE_PAYMENT);
    }
}
