// escrow-core/examples/booking_flow.rs

//! Walks one booking through payment, acceptance and an additional-hours bill using
//! the in-memory adapters.

use chrono::{TimeZone, Utc};
use escrow_core::memory::{InMemoryStore, ManualClock, MockPaymentProcessor, RecordingNotifier};
use escrow_core::model::{
  ApprovalDecision, BookingKind, Draft, DraftStatus, EntryCategory, ProcessorEvent, ProviderProfile,
};
use escrow_core::{BillingPolicy, Caller, Coordinator, CoreError, Deps, EscrowPaymentRequest, NewTimeEntry, WebhookOutcome};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), CoreError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Booking Flow Example ---");

  let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
  let store = Arc::new(InMemoryStore::new());
  let payments = Arc::new(MockPaymentProcessor::new());
  let notifier = Arc::new(RecordingNotifier::new());
  let deps = Deps::new(
    store.clone(),
    payments.clone(),
    notifier.clone(),
    Arc::new(ManualClock::new(now)),
    BillingPolicy::default(),
  );
  let coordinator = Coordinator::new(deps)?;

  let customer = Caller::new("customer-anna")?;
  let provider = Caller::new("provider-ben")?;

  // 1. A provider with a payout-ready account and a draft booking from the customer.
  payments.add_account("acct_ben", true);
  store.insert(&ProviderProfile {
    provider_id: provider.id().to_string(),
    email: Some("ben@example.com".to_string()),
    connected_account_id: Some("acct_ben".to_string()),
    updated_at: now,
  })?;
  store.insert(&Draft {
    draft_id: "draft-1".to_string(),
    customer_id: customer.id().to_string(),
    provider_id: provider.id().to_string(),
    category: "gardening".to_string(),
    price_in_cents: 20_000,
    currency: "eur".to_string(),
    booking_kind: BookingKind::FullDay,
    booked_hours: None,
    start_at: Some(Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()),
    end_at: Some(Utc.with_ymd_and_hms(2024, 5, 10, 17, 0, 0).unwrap()),
    status: DraftStatus::PendingPaymentSetup,
    converted_to_order_id: None,
    last_payment_error: None,
    created_at: now,
    updated_at: now,
  })?;

  // 2. The customer pays into escrow.
  let payment = coordinator
    .create_escrow_payment(
      &customer,
      EscrowPaymentRequest {
        draft_id: "draft-1".to_string(),
        provider_id: provider.id().to_string(),
        amount_in_cents: 20_000,
        metadata: BTreeMap::new(),
      },
    )
    .await?;
  info!(
    payment_intent_id = %payment.payment_intent_id,
    fee = payment.application_fee_in_cents,
    "Escrow payment created."
  );

  // 3. The processor confirms the payment.
  let event: ProcessorEvent = serde_json::from_value(json!({
    "id": "evt_booking_1",
    "type": "payment_intent.succeeded",
    "data": { "object": {
      "id": payment.payment_intent_id,
      "amount": 20_000,
      "amount_received": 20_000,
      "metadata": { "kind": "booking", "draftId": "draft-1" }
    }}
  }))
  .map_err(|e| CoreError::Internal(e.to_string()))?;
  let order_id = match coordinator.consume_webhook(event).await? {
    WebhookOutcome::Processed { order_id: Some(id) } => id,
    other => return Err(CoreError::Internal(format!("Unexpected webhook outcome: {}", other.label()))),
  };
  info!(%order_id, "Order created from the paid draft.");

  // 4. The provider accepts and logs extra hours.
  let order = coordinator.accept_order(&provider, &order_id).await?;
  info!(status = %order.status, "Order accepted.");

  coordinator.initialize_time_tracking(&provider, &order_id, 8.0, 5_000).await?;
  let entry = coordinator
    .log_time_entry(
      &provider,
      &order_id,
      NewTimeEntry {
        category: EntryCategory::Additional,
        hours: 2.0,
        description: "Hedge removal".to_string(),
        work_date: None,
      },
    )
    .await?;
  let ids = vec![entry.entry_id.clone()];

  // 5. The customer approves and the provider bills the extra hours.
  let request = coordinator
    .submit_for_customer_approval(&provider, &order_id, &ids, None)
    .await?;
  coordinator
    .process_customer_approval(&customer, &request.request_id, ApprovalDecision::Approved, None, None)
    .await?;
  let bill = coordinator.bill_approved_additional_hours(&provider, &order_id, ids).await?;
  info!(
    amount = bill.amount_in_cents,
    fee = bill.application_fee_in_cents,
    "Additional hours billed."
  );

  info!(notifications = notifier.sent().len(), "--- Booking Flow Example Complete ---");
  Ok(())
}
