//! # In-Memory Backend
//!
//! A stand-in for the pledge/payment server. Holds a small seeded ledger,
//! answers list and detail reads, and applies the four write operations with
//! the same rules the real server enforces.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  QueryClient ──► TransportFetcher ──► fetch_entities(family, params)   │
//! │             └──► TransportMutation ─► perform_mutation(kind, input)    │
//! │                                              │                          │
//! │                                  simulated latency, then Ledger        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use almoner_core::inputs::{
    CreatePaymentInput, CreatePledgeInput, DeletePaymentInput, UpdatePledgeStatusInput,
};
use almoner_core::types::EntityId;
use almoner_core::{
    Category, Contact, CoreError, Money, Page, ParamBag, ParamField, Payment, PaymentMethod,
    Pledge, PledgeDetail, PledgeStatus, ValidationError, DEFAULT_PAGE_LIMIT,
};
use almoner_query::{
    EntityFamily, EntityTransport, FailureKind, FetchFailure, MutationFailure, MutationKind,
};
use chrono::{NaiveDate, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

// =============================================================================
// Ledger
// =============================================================================

/// Server-side tables.
#[derive(Debug, Default)]
pub struct Ledger {
    contacts: BTreeMap<EntityId, Contact>,
    categories: BTreeMap<EntityId, Category>,
    pledges: BTreeMap<EntityId, Pledge>,
    payments: BTreeMap<EntityId, Payment>,
    next_id: EntityId,
}

impl Ledger {
    /// Two contacts, three pledges, one payment.
    pub fn seeded() -> Self {
        let mut ledger = Ledger {
            next_id: 100,
            ..Default::default()
        };
        let now = Utc::now();
        let day = |m, d| NaiveDate::from_ymd_opt(2026, m, d).unwrap_or(NaiveDate::MIN);

        for (id, name) in [(3, "Miriam Cohen"), (4, "David Levi")] {
            ledger.contacts.insert(
                id,
                Contact {
                    id,
                    display_name: name.to_string(),
                    email: None,
                    phone: None,
                    created_at: now,
                },
            );
        }
        ledger.categories.insert(
            1,
            Category {
                id: 1,
                name: "Building Fund".to_string(),
            },
        );

        for (id, contact_id, category_id, amount) in [
            (7, 3, Some(1), 1_800_00),
            (8, 4, Some(1), 500_00),
            (9, 3, None, 360_00),
        ] {
            ledger.pledges.insert(
                id,
                Pledge {
                    id,
                    contact_id,
                    category_id,
                    amount: Money::from_cents(amount),
                    paid: Money::zero(),
                    status: PledgeStatus::Open,
                    plan: None,
                    notes: None,
                    pledged_on: day(1, 15),
                    created_at: now,
                },
            );
        }

        ledger.insert_payment(7, 3, Money::from_cents(300_00), PaymentMethod::Check, day(2, 1));
        ledger
    }

    fn next_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }

    fn insert_payment(
        &mut self,
        pledge_id: EntityId,
        contact_id: EntityId,
        amount: Money,
        method: PaymentMethod,
        paid_on: NaiveDate,
    ) -> Payment {
        let id = self.next_id();
        let payment = Payment {
            id,
            pledge_id,
            contact_id,
            amount,
            method,
            reference: None,
            paid_on,
            created_at: Utc::now(),
        };
        self.payments.insert(id, payment.clone());
        if let Some(pledge) = self.pledges.get_mut(&pledge_id) {
            pledge.paid += amount;
            if pledge.paid >= pledge.amount {
                pledge.status = PledgeStatus::Fulfilled;
            }
        }
        payment
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn list_pledges(&self, params: &ParamBag) -> Page<Pledge> {
        let contact = params.get_int(ParamField::ContactId);
        let category = params.get_int(ParamField::CategoryId);
        let status = params
            .get(ParamField::Status)
            .and_then(|v| v.as_text())
            .map(str::to_string);

        let matching: Vec<Pledge> = self
            .pledges
            .values()
            .filter(|p| contact.map_or(true, |c| p.contact_id == c))
            .filter(|p| category.map_or(true, |c| p.category_id == Some(c)))
            .filter(|p| status.as_deref().map_or(true, |s| p.status.as_str() == s))
            .cloned()
            .collect();
        paginate(matching, params)
    }

    pub fn pledge_detail(&self, pledge_id: EntityId) -> Result<PledgeDetail, CoreError> {
        let pledge = self
            .pledges
            .get(&pledge_id)
            .cloned()
            .ok_or(CoreError::PledgeNotFound(pledge_id))?;
        let contact = self
            .contacts
            .get(&pledge.contact_id)
            .cloned()
            .ok_or(CoreError::ContactNotFound(pledge.contact_id))?;
        let payments = self
            .payments
            .values()
            .filter(|p| p.pledge_id == pledge_id)
            .cloned()
            .collect();

        Ok(PledgeDetail {
            pledge,
            contact,
            payments,
        })
    }

    pub fn list_payments(&self, family: EntityFamily, params: &ParamBag) -> Page<Payment> {
        let pledge = params.get_int(ParamField::PledgeId);
        let contact = params.get_int(ParamField::ContactId);

        let matching: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| match family {
                EntityFamily::PaymentsByContact => Some(p.contact_id) == contact,
                _ => Some(p.pledge_id) == pledge,
            })
            .cloned()
            .collect();
        paginate(matching, params)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn create_pledge(&mut self, input: CreatePledgeInput) -> Result<Pledge, CoreError> {
        input.validate()?;
        if !self.contacts.contains_key(&input.contact_id) {
            return Err(CoreError::ContactNotFound(input.contact_id));
        }
        if let Some(category_id) = input.category_id {
            if !self.categories.contains_key(&category_id) {
                return Err(ValidationError::NotAllowed {
                    field: "categoryId".to_string(),
                    allowed: self.categories.keys().map(|id| id.to_string()).collect(),
                }
                .into());
            }
        }

        let id = self.next_id();
        let pledge = Pledge {
            id,
            contact_id: input.contact_id,
            category_id: input.category_id,
            amount: input.amount,
            paid: Money::zero(),
            status: PledgeStatus::Open,
            plan: input.plan,
            notes: input.notes,
            pledged_on: input.pledged_on,
            created_at: Utc::now(),
        };
        self.pledges.insert(id, pledge.clone());
        Ok(pledge)
    }

    pub fn record_payment(&mut self, input: CreatePaymentInput) -> Result<Payment, CoreError> {
        input.validate()?;
        let pledge = self
            .pledges
            .get(&input.pledge_id)
            .ok_or(CoreError::PledgeNotFound(input.pledge_id))?;

        if pledge.contact_id != input.contact_id {
            return Err(CoreError::ContactMismatch {
                pledge_id: pledge.id,
                expected: pledge.contact_id,
                actual: input.contact_id,
            });
        }
        if pledge.status == PledgeStatus::Cancelled {
            return Err(CoreError::InvalidPledgeStatus {
                pledge_id: pledge.id,
                status: pledge.status.as_str().to_string(),
            });
        }

        let mut payment = self.insert_payment(
            input.pledge_id,
            input.contact_id,
            input.amount,
            input.method,
            input.paid_on,
        );
        if input.reference.is_some() {
            payment.reference = input.reference;
            self.payments.insert(payment.id, payment.clone());
        }
        Ok(payment)
    }

    pub fn update_status(&mut self, input: UpdatePledgeStatusInput) -> Result<Pledge, CoreError> {
        let pledge = self
            .pledges
            .get_mut(&input.pledge_id)
            .ok_or(CoreError::PledgeNotFound(input.pledge_id))?;
        pledge.status = input.status;
        Ok(pledge.clone())
    }

    pub fn delete_payment(&mut self, input: DeletePaymentInput) -> Result<Payment, CoreError> {
        let payment = self
            .payments
            .remove(&input.payment_id)
            .ok_or(CoreError::PaymentNotFound(input.payment_id))?;
        if let Some(pledge) = self.pledges.get_mut(&payment.pledge_id) {
            pledge.paid -= payment.amount;
            if pledge.status == PledgeStatus::Fulfilled && pledge.paid < pledge.amount {
                pledge.status = PledgeStatus::Open;
            }
        }
        Ok(payment)
    }
}

fn paginate<T>(items: Vec<T>, params: &ParamBag) -> Page<T> {
    let page = params.get_int(ParamField::Page).unwrap_or(1).max(1);
    let limit = params
        .get_int(ParamField::Limit)
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .max(1);
    let total = items.len() as i64;
    let skip = ((page - 1) * limit) as usize;

    Page {
        items: items.into_iter().skip(skip).take(limit as usize).collect(),
        total,
        page,
        limit,
    }
}

// =============================================================================
// Memory Backend (EntityTransport)
// =============================================================================

/// Shared ledger behind a simulated network hop.
pub struct MemoryBackend {
    ledger: Mutex<Ledger>,
    latency: Duration,
}

impl MemoryBackend {
    pub fn new(ledger: Ledger, latency: Duration) -> Arc<Self> {
        Arc::new(MemoryBackend {
            ledger: Mutex::new(ledger),
            latency,
        })
    }

    pub fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("ledger mutex poisoned")
    }

    fn read(&self, family: EntityFamily, params: &ParamBag) -> Result<Value, FetchFailure> {
        let ledger = self.ledger();
        let value = match family {
            EntityFamily::Pledges => serde_json::to_value(ledger.list_pledges(params)),
            EntityFamily::PledgeDetail => {
                let pledge_id = params
                    .get_int(ParamField::PledgeId)
                    .ok_or_else(|| FetchFailure::invalid_key("pledge detail without pledgeId"))?;
                let detail = ledger
                    .pledge_detail(pledge_id)
                    .map_err(|e| FetchFailure::not_found(e.to_string()))?;
                serde_json::to_value(detail)
            }
            EntityFamily::PaymentsByPledge | EntityFamily::PaymentsByContact => {
                serde_json::to_value(ledger.list_payments(family, params))
            }
        };
        value.map_err(|e| FetchFailure::transport(e.to_string()))
    }

    fn write(&self, kind: &MutationKind, input: Value) -> Result<Value, MutationFailure> {
        let mut ledger = self.ledger();
        match kind {
            k if *k == MutationKind::CREATE_PLEDGE => {
                respond(ledger.create_pledge(decode(kind, input)?))
            }
            k if *k == MutationKind::CREATE_PAYMENT => {
                respond(ledger.record_payment(decode(kind, input)?))
            }
            k if *k == MutationKind::UPDATE_PLEDGE_STATUS => {
                respond(ledger.update_status(decode(kind, input)?))
            }
            k if *k == MutationKind::DELETE_PAYMENT => {
                respond(ledger.delete_payment(decode(kind, input)?))
            }
            _ => Err(MutationFailure::rejected(format!(
                "unsupported mutation: {}",
                kind
            ))),
        }
    }
}

fn decode<T: DeserializeOwned>(kind: &MutationKind, input: Value) -> Result<T, MutationFailure> {
    serde_json::from_value(input)
        .map_err(|e| MutationFailure::rejected(format!("malformed {} input: {}", kind, e)))
}

fn respond<T: Serialize>(outcome: Result<T, CoreError>) -> Result<Value, MutationFailure> {
    match outcome {
        Ok(value) => {
            serde_json::to_value(value).map_err(|e| MutationFailure::transport(e.to_string()))
        }
        Err(
            e @ (CoreError::ContactNotFound(_)
            | CoreError::PledgeNotFound(_)
            | CoreError::PaymentNotFound(_)),
        ) => Err(MutationFailure::new(FailureKind::NotFound, e.to_string())),
        Err(e) => Err(MutationFailure::rejected(e.to_string())),
    }
}

impl EntityTransport for MemoryBackend {
    fn fetch_entities(
        &self,
        family: EntityFamily,
        params: ParamBag,
    ) -> BoxFuture<'static, Result<Value, FetchFailure>> {
        debug!(family = family.as_str(), params = %params, "Backend read");
        let outcome = self.read(family, &params);
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            outcome
        }
        .boxed()
    }

    fn perform_mutation(
        &self,
        kind: &MutationKind,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, MutationFailure>> {
        debug!(kind = %kind, "Backend write");
        let outcome = self.write(kind, input);
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            outcome
        }
        .boxed()
    }
}
