//! # Almoner Query Walkthrough
//!
//! Plays the "record a payment from the pledge screen" workflow against an
//! in-memory backend and logs what the cache does at each step.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Pledge screen observes   [pledges, detail, 7]        (subscribed)  │
//! │  2. Contact sidebar reads    [pledges, list, {contactId=3}]  (one-off) │
//! │  3. Record payment form      create-payment {pledgeId 7, contactId 3}  │
//! │        │                                                                │
//! │        ▼ invalidation                                                   │
//! │     detail 7  ── observed ──► refetched now, balance updates           │
//! │     list      ── unobserved ► stale until next read                    │
//! │  4. shutdown: drain in-flight fetches, clear cache                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info,almoner_query=debug`).

mod backend;
mod error;

use std::sync::Arc;
use std::time::Duration;

use almoner_core::inputs::CreatePaymentInput;
use almoner_core::params::PledgeFilter;
use almoner_core::{CoreError, Money, Page, Payment, PaymentMethod, Pledge, PledgeDetail};
use almoner_query::{
    pledge_detail, pledge_list, CacheStatsSnapshot, InvalidationReport, MutationKind,
    MutationOptions, QueryClient, QueryConfig, QueryFetcher, QuerySnapshot, TransportFetcher,
    TransportMutation,
};
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::backend::{Ledger, MemoryBackend};
use crate::error::{DemoError, DemoResult};

/// What the walkthrough observed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkthroughSummary {
    pub balance_before: Money,
    pub balance_after: Money,
    pub payment_id: i64,
    pub invalidation: InvalidationReport,
    pub list_left_stale: bool,
    pub stats: CacheStatsSnapshot,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,almoner_query=debug")),
        )
        .with_target(true)
        .init();

    info!("Starting Almoner query walkthrough...");

    let config = QueryConfig::load_or_default(None);
    info!(
        client = %config.client.name,
        stale_ms = config.cache.stale_time_ms,
        gc_ms = config.cache.gc_time_ms,
        "Configuration loaded"
    );

    let backend = MemoryBackend::new(Ledger::seeded(), Duration::from_millis(40));
    let client = QueryClient::new(&config);

    let summary = run_walkthrough(&client, backend).await;
    client.shutdown().await;

    let summary = summary?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Runs steps 1–3 of the workflow on `client`.
async fn run_walkthrough(
    client: &QueryClient,
    backend: Arc<MemoryBackend>,
) -> DemoResult<WalkthroughSummary> {
    let fetcher: Arc<dyn QueryFetcher> = Arc::new(TransportFetcher::new(Arc::clone(&backend)));
    let options = client.default_options();

    // 1. Pledge screen
    let detail_key = pledge_detail(7);
    let mut detail = client.use_query(detail_key.clone(), Arc::clone(&fetcher), options)?;
    let balance_before = balance_of(&detail.settled().await?)?;
    info!(key = %detail_key, balance = %balance_before, "Pledge screen loaded");

    // 2. Contact sidebar
    let filter = PledgeFilter {
        contact_id: Some(3),
        ..Default::default()
    };
    filter.validate().map_err(CoreError::from)?;
    let list_key = pledge_list(filter.to_params());
    let pledges: Page<Pledge> = client
        .fetch_query_as(&list_key, Arc::clone(&fetcher), options)
        .await?;
    info!(key = %list_key, pledges = pledges.total, "Contact pledges loaded");

    // 3. Record payment
    let record_payment = client.use_mutation(
        MutationKind::CREATE_PAYMENT,
        Arc::new(TransportMutation::new(
            Arc::clone(&backend),
            MutationKind::CREATE_PAYMENT,
        )),
        MutationOptions::default(),
    );
    let input = CreatePaymentInput {
        pledge_id: 7,
        contact_id: 3,
        amount: Money::from_major(250),
        method: PaymentMethod::Card,
        reference: Some("AUTH-4417".to_string()),
        paid_on: Utc::now().date_naive(),
    };
    input.validate().map_err(CoreError::from)?;

    let outcome = record_payment.trigger(&input).await?;
    let payment: Payment = outcome.result_as()?;
    info!(
        payment = payment.id,
        refetched = outcome.invalidation.refetched.len(),
        deferred = outcome.invalidation.deferred.len(),
        "Payment recorded"
    );

    let balance_after = balance_of(&detail.settled().await?)?;
    info!(key = %detail_key, balance = %balance_after, "Pledge screen refreshed");

    let list_left_stale = client
        .get_query(&list_key)
        .is_some_and(|snapshot| snapshot.is_stale);

    Ok(WalkthroughSummary {
        balance_before,
        balance_after,
        payment_id: payment.id,
        invalidation: outcome.invalidation,
        list_left_stale,
        stats: client.stats(),
    })
}

fn balance_of(snapshot: &QuerySnapshot) -> DemoResult<Money> {
    snapshot
        .data_as::<PledgeDetail>()?
        .map(|detail| detail.balance())
        .ok_or_else(|| DemoError::Unexpected(format!("{} settled without data", snapshot.key)))
}
