// tests/time_tracking_tests.rs
mod common;

use common::*;
use escrow_core::escrow::metadata;
use escrow_core::model::{
  ApprovalDecision, ApprovalStatus, EntryCategory, EntryStatus, OrderStatus, OrderTimeTracking, TimeEntry,
  TrackingStatus,
};
use escrow_core::escrow::{create_escrow_intent, EscrowIntentRequest, EscrowPurpose};
use escrow_core::memory::{MockPaymentProcessor, RecordingNotifier};
use escrow_core::ports::Notification;
use escrow_core::{BillingPolicy, CoreError, ErrorKind, NewTimeEntry};
use serial_test::serial;
use std::collections::BTreeMap;
use std::time::Duration;

const RATE: i64 = 5_000;

fn additional(hours: f64) -> NewTimeEntry {
  NewTimeEntry {
    category: EntryCategory::Additional,
    hours,
    description: "Extra hedge trimming".to_string(),
    work_date: None,
  }
}

fn original(hours: f64) -> NewTimeEntry {
  NewTimeEntry {
    category: EntryCategory::Original,
    ..additional(hours)
  }
}

/// An active order with tracking at 50 EUR per hour and a payout-ready provider.
fn tracked_order(h: &Harness, order_id: &str) {
  h.seed_provider(PROVIDER, true);
  h.seed_order(order_id, OrderStatus::Active, Slot::full_days(10, 10));
}

fn tracking(h: &Harness, order_id: &str) -> OrderTimeTracking {
  h.store.snapshot::<OrderTimeTracking>(order_id).expect("tracking exists")
}

fn entry(h: &Harness, entry_id: &str) -> TimeEntry {
  h.store.snapshot::<TimeEntry>(entry_id).expect("entry exists")
}

#[tokio::test]
#[serial]
async fn approved_additional_hours_are_billed_with_the_platform_fee() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  let customer = caller(CUSTOMER);

  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let logged = h.coordinator.log_time_entry(&provider, "o1", additional(2.0)).await.unwrap();
  assert_eq!(logged.billable_amount_in_cents, Some(10_000));
  assert_eq!(logged.status, EntryStatus::Logged);

  let ids = vec![logged.entry_id.clone()];
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &ids, Some("Took longer".into()))
    .await
    .unwrap();
  assert_eq!(request.status, ApprovalStatus::Pending);
  assert_eq!(request.total_amount_in_cents, 10_000);
  assert_eq!(tracking(&h, "o1").status, TrackingStatus::SubmittedForApproval);

  let answered = h
    .coordinator
    .process_customer_approval(&customer, &request.request_id, ApprovalDecision::Approved, None, None)
    .await
    .unwrap();
  assert_eq!(answered.status, ApprovalStatus::Approved);
  assert_eq!(entry(&h, &logged.entry_id).status, EntryStatus::CustomerApproved);
  assert_eq!(tracking(&h, "o1").total_approved_hours, 2.0);

  let outcome = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", ids.clone())
    .await
    .unwrap();
  assert_eq!(outcome.amount_in_cents, 10_000);
  assert_eq!(outcome.application_fee_in_cents, 450);
  assert_eq!(outcome.billed_entry_ids, ids);
  assert_eq!(outcome.billed_hours, 2.0);

  let intents = h.payments.intents();
  assert_eq!(intents.len(), 1);
  let sent = &intents[0].request;
  assert_eq!(sent.metadata.get(metadata::KIND).map(String::as_str), Some(metadata::KIND_ADDITIONAL_HOURS));
  assert_eq!(sent.metadata.get(metadata::ORDER_ID).map(String::as_str), Some("o1"));

  let billed = entry(&h, &logged.entry_id);
  assert_eq!(billed.status, EntryStatus::Billed);
  assert_eq!(billed.payment_intent_id.as_deref(), Some(outcome.payment_intent_id.as_str()));
  let t = tracking(&h, "o1");
  assert_eq!(t.status, TrackingStatus::Completed);
  assert_eq!((t.total_billed_hours, t.total_billed_cents), (2.0, 10_000));

  assert!(h.notifier.sent().contains(&Notification::HoursBilled {
    order_id: "o1".into(),
    customer_id: CUSTOMER.into(),
    amount_in_cents: 10_000
  }));
}

#[tokio::test]
#[serial]
async fn rejected_hours_cannot_be_billed() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);

  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let logged = h.coordinator.log_time_entry(&provider, "o1", additional(3.0)).await.unwrap();
  let ids = vec![logged.entry_id.clone()];
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &ids, None)
    .await
    .unwrap();
  h.coordinator
    .process_customer_approval(
      &caller(CUSTOMER),
      &request.request_id,
      ApprovalDecision::Rejected,
      None,
      Some("Not agreed".into()),
    )
    .await
    .unwrap();

  assert_eq!(entry(&h, &logged.entry_id).status, EntryStatus::CustomerRejected);
  assert_eq!(tracking(&h, "o1").status, TrackingStatus::Active);

  let err = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", ids)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
  assert!(h.payments.intents().is_empty());
}

#[tokio::test]
#[serial]
async fn partial_approval_bills_only_the_approved_entries() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);

  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let kept = h.coordinator.log_time_entry(&provider, "o1", additional(1.0)).await.unwrap();
  let dropped = h.coordinator.log_time_entry(&provider, "o1", additional(1.5)).await.unwrap();
  let ids = vec![kept.entry_id.clone(), dropped.entry_id.clone()];
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &ids, None)
    .await
    .unwrap();

  let foreign = h
    .coordinator
    .process_customer_approval(
      &caller(CUSTOMER),
      &request.request_id,
      ApprovalDecision::PartiallyApproved,
      Some(vec!["not-in-request".into()]),
      None,
    )
    .await
    .unwrap_err();
  assert_eq!(foreign.kind(), ErrorKind::InvalidArgument);

  h.coordinator
    .process_customer_approval(
      &caller(CUSTOMER),
      &request.request_id,
      ApprovalDecision::PartiallyApproved,
      Some(vec![kept.entry_id.clone()]),
      None,
    )
    .await
    .unwrap();
  assert_eq!(tracking(&h, "o1").status, TrackingStatus::PartiallyApproved);

  let outcome = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", ids)
    .await
    .unwrap();
  assert_eq!(outcome.amount_in_cents, 5_000);
  assert_eq!(outcome.billed_entry_ids, vec![kept.entry_id.clone()]);
  assert_eq!(entry(&h, &dropped.entry_id).status, EntryStatus::CustomerRejected);
}

#[tokio::test]
#[serial]
async fn totals_stay_monotone_and_recompute_is_idempotent() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);

  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  h.coordinator.log_time_entry(&provider, "o1", original(4.0)).await.unwrap();
  let extra = h.coordinator.log_time_entry(&provider, "o1", additional(2.0)).await.unwrap();
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &[extra.entry_id.clone()], None)
    .await
    .unwrap();
  h.coordinator
    .process_customer_approval(&caller(CUSTOMER), &request.request_id, ApprovalDecision::Approved, None, None)
    .await
    .unwrap();

  let stored = tracking(&h, "o1");
  let totals = stored.totals();
  assert!(totals.is_monotone());
  assert_eq!((totals.logged_hours, totals.approved_hours, totals.billed_hours), (6.0, 2.0, 0.0));

  let first = h.coordinator.recompute_time_tracking("o1").await.unwrap();
  let second = h.coordinator.recompute_time_tracking("o1").await.unwrap();
  assert_eq!(first, totals);
  assert_eq!(first, second);
  assert_eq!(tracking(&h, "o1").updated_at, stored.updated_at, "no write when already consistent");
}

#[tokio::test]
#[serial]
async fn recompute_repairs_drifted_totals() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  h.coordinator.log_time_entry(&provider, "o1", additional(1.0)).await.unwrap();

  let mut drifted = tracking(&h, "o1");
  drifted.total_logged_hours = 42.0;
  h.store.insert(&drifted).unwrap();

  let repaired = h.coordinator.recompute_time_tracking("o1").await.unwrap();
  assert_eq!(repaired.logged_hours, 1.0);
  assert_eq!(tracking(&h, "o1").total_logged_hours, 1.0);
}

#[tokio::test]
#[serial]
async fn tracking_requires_a_fulfilling_order_and_starts_once() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Active, Slot::full_days(10, 10));
  h.seed_order("o2", OrderStatus::Clearing, Slot::full_days(11, 11));
  let provider = caller(PROVIDER);

  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let again = h
    .coordinator
    .initialize_time_tracking(&provider, "o1", 8.0, RATE)
    .await
    .unwrap_err();
  assert_eq!(again.kind(), ErrorKind::AlreadyExists);

  let clearing = h
    .coordinator
    .initialize_time_tracking(&provider, "o2", 8.0, RATE)
    .await
    .unwrap_err();
  assert_eq!(clearing.kind(), ErrorKind::FailedPrecondition);

  let by_customer = h
    .coordinator
    .initialize_time_tracking(&caller(CUSTOMER), "o2", 8.0, RATE)
    .await
    .unwrap_err();
  assert_eq!(by_customer.kind(), ErrorKind::PermissionDenied);

  let bad_rate = h
    .coordinator
    .initialize_time_tracking(&provider, "o2", 8.0, 0)
    .await
    .unwrap_err();
  assert_eq!(bad_rate.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
#[serial]
async fn entries_are_validated_and_submitted_once() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);

  let untracked = h
    .coordinator
    .log_time_entry(&provider, "o1", additional(1.0))
    .await
    .unwrap_err();
  assert_eq!(untracked.kind(), ErrorKind::NotFound);

  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  for hours in [0.0, -1.0, 24.5] {
    let err = h
      .coordinator
      .log_time_entry(&provider, "o1", additional(hours))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument, "hours = {hours}");
  }
  let by_customer = h
    .coordinator
    .log_time_entry(&caller(CUSTOMER), "o1", additional(1.0))
    .await
    .unwrap_err();
  assert_eq!(by_customer.kind(), ErrorKind::PermissionDenied);

  let logged = h.coordinator.log_time_entry(&provider, "o1", additional(1.0)).await.unwrap();
  let ids = vec![logged.entry_id.clone()];
  h.coordinator
    .submit_for_customer_approval(&provider, "o1", &ids, None)
    .await
    .unwrap();
  let resubmit = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &ids, None)
    .await
    .unwrap_err();
  assert_eq!(resubmit.kind(), ErrorKind::FailedPrecondition);

  let empty = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &[], None)
    .await
    .unwrap_err();
  assert_eq!(empty.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
#[serial]
async fn only_the_customer_answers_and_only_once() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let logged = h.coordinator.log_time_entry(&provider, "o1", additional(1.0)).await.unwrap();
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &[logged.entry_id.clone()], None)
    .await
    .unwrap();

  let self_approval = h
    .coordinator
    .process_customer_approval(&provider, &request.request_id, ApprovalDecision::Approved, None, None)
    .await
    .unwrap_err();
  assert_eq!(self_approval.kind(), ErrorKind::PermissionDenied);

  h.coordinator
    .process_customer_approval(&caller(CUSTOMER), &request.request_id, ApprovalDecision::Approved, None, None)
    .await
    .unwrap();
  let twice = h
    .coordinator
    .process_customer_approval(&caller(CUSTOMER), &request.request_id, ApprovalDecision::Rejected, None, None)
    .await
    .unwrap_err();
  assert_eq!(twice.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
#[serial]
async fn logging_after_billing_reopens_the_tracking() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let first = h.coordinator.log_time_entry(&provider, "o1", additional(1.0)).await.unwrap();
  let ids = vec![first.entry_id.clone()];
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, "o1", &ids, None)
    .await
    .unwrap();
  h.coordinator
    .process_customer_approval(&caller(CUSTOMER), &request.request_id, ApprovalDecision::Approved, None, None)
    .await
    .unwrap();
  h.coordinator.bill_approved_additional_hours(&provider, "o1", ids.clone()).await.unwrap();
  assert_eq!(tracking(&h, "o1").status, TrackingStatus::Completed);

  let again = h.coordinator.bill_approved_additional_hours(&provider, "o1", ids).await.unwrap_err();
  assert_eq!(again.kind(), ErrorKind::FailedPrecondition, "billed entries are not billed twice");

  h.coordinator.log_time_entry(&provider, "o1", additional(0.5)).await.unwrap();
  let t = tracking(&h, "o1");
  assert_eq!(t.status, TrackingStatus::Active);
  assert_eq!(t.total_logged_hours, 1.5);
  assert_eq!(t.total_billed_hours, 1.0);
}

/// Logs `hours` of additional work and has the customer approve it. Returns the entry ids.
async fn approved_batch(h: &Harness, order_id: &str, hours: f64) -> Vec<String> {
  let provider = caller(PROVIDER);
  let logged = h.coordinator.log_time_entry(&provider, order_id, additional(hours)).await.unwrap();
  let ids = vec![logged.entry_id];
  let request = h
    .coordinator
    .submit_for_customer_approval(&provider, order_id, &ids, None)
    .await
    .unwrap();
  h.coordinator
    .process_customer_approval(&caller(CUSTOMER), &request.request_id, ApprovalDecision::Approved, None, None)
    .await
    .unwrap();
  ids
}

#[tokio::test]
#[serial]
async fn each_billed_batch_gets_its_own_intent() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();

  let first_ids = approved_batch(&h, "o1", 2.0).await;
  let first = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", first_ids.clone())
    .await
    .unwrap();
  let second_ids = approved_batch(&h, "o1", 2.0).await;
  let second = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", second_ids.clone())
    .await
    .unwrap();

  assert_ne!(first.payment_intent_id, second.payment_intent_id);
  assert_eq!(h.payments.intents().len(), 2);
  assert_eq!(
    entry(&h, &first_ids[0]).payment_intent_id.as_deref(),
    Some(first.payment_intent_id.as_str())
  );
  assert_eq!(
    entry(&h, &second_ids[0]).payment_intent_id.as_deref(),
    Some(second.payment_intent_id.as_str())
  );
  let t = tracking(&h, "o1");
  assert_eq!((t.total_billed_hours, t.total_billed_cents), (4.0, 20_000));
}

#[tokio::test]
#[serial]
async fn billing_the_same_entries_twice_charges_once() {
  let h = Harness::new();
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let ids = approved_batch(&h, "o1", 2.0).await;

  let billed = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", ids.clone())
    .await
    .unwrap();
  let again = h
    .coordinator
    .bill_approved_additional_hours(&provider, "o1", ids.clone())
    .await
    .unwrap_err();
  assert_eq!(again.kind(), ErrorKind::FailedPrecondition);

  // A retry that reaches the processor for the same batch gets the existing intent back.
  let retried = create_escrow_intent(
    h.deps(),
    &EscrowIntentRequest {
      customer_id: CUSTOMER.to_string(),
      provider_id: PROVIDER.to_string(),
      amount_in_cents: 10_000,
      purpose: EscrowPurpose::AdditionalHours {
        order_id: "o1".to_string(),
        time_entry_ids: ids,
      },
      extra_metadata: BTreeMap::new(),
    },
  )
  .await
  .unwrap();
  assert_eq!(retried.payment_intent_id, billed.payment_intent_id);
  assert_eq!(h.payments.intents().len(), 1);
}

#[tokio::test]
#[serial]
async fn concurrent_billing_of_one_batch_creates_one_intent() {
  let h = Harness::with(
    MockPaymentProcessor::with_latency(Duration::from_millis(50)),
    RecordingNotifier::new(),
    BillingPolicy::default(),
  );
  tracked_order(&h, "o1");
  let provider = caller(PROVIDER);
  h.coordinator.initialize_time_tracking(&provider, "o1", 8.0, RATE).await.unwrap();
  let ids = approved_batch(&h, "o1", 2.0).await;

  let (a, b) = tokio::join!(
    h.coordinator.bill_approved_additional_hours(&provider, "o1", ids.clone()),
    h.coordinator.bill_approved_additional_hours(&provider, "o1", ids.clone()),
  );

  let results = [a, b];
  let winner = results.iter().find_map(|r| r.as_ref().ok()).expect("one billing succeeds");
  assert!(
    results
      .iter()
      .all(|r| matches!(r, Ok(_) | Err(CoreError::AlreadyExists(_)) | Err(CoreError::FailedPrecondition(_)))),
    "results: {results:?}"
  );
  assert_eq!(h.payments.intents().len(), 1);
  assert_eq!(
    entry(&h, &ids[0]).payment_intent_id.as_deref(),
    Some(winner.payment_intent_id.as_str())
  );
  assert_eq!(tracking(&h, "o1").total_billed_cents, 10_000);
}
