// tests/order_lifecycle_tests.rs
mod common;

use common::*;
use escrow_core::memory::{MockPaymentProcessor, RecordingNotifier};
use escrow_core::model::{ChatRecord, OrderStatus};
use escrow_core::ports::Notification;
use escrow_core::{BillingPolicy, BookingWindow, ErrorKind};
use escrow_core::model::BookingKind;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn provider_accepts_a_paid_order() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 11));

  let order = h.coordinator.accept_order(&caller(PROVIDER), "o1").await.unwrap();

  assert_eq!(order.status, OrderStatus::Active);
  assert_eq!(h.order("o1").status, OrderStatus::Active);
  let last = h.order("o1").status_history.last().cloned().unwrap();
  assert_eq!((last.from, last.to), (Some(OrderStatus::Clearing), OrderStatus::Active));
  assert_eq!(last.actor, PROVIDER);

  let chat = h.store.snapshot::<ChatRecord>("o1").unwrap();
  assert!(!chat.is_locked);
  assert_eq!(
    h.notifier.sent(),
    vec![Notification::OrderAccepted {
      order_id: "o1".into(),
      customer_id: CUSTOMER.into()
    }]
  );
}

#[tokio::test]
#[serial]
async fn overlapping_full_day_booking_blocks_acceptance() {
  let h = Harness::new();
  h.seed_order("O1", OrderStatus::Active, Slot::full_days(10, 12));
  h.seed_order("O2", OrderStatus::Clearing, Slot::full_days(12, 13));

  let err = h.coordinator.accept_order(&caller(PROVIDER), "O2").await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
  assert!(err.to_string().contains("overlaps with active order O1"), "{err}");
  assert_eq!(h.order("O2").status, OrderStatus::Clearing);
  assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
#[serial]
async fn hourly_bookings_share_a_day_within_the_cap() {
  let h = Harness::new();
  h.seed_order("O1", OrderStatus::InProgress, Slot::hourly(10, 6.0));
  h.seed_order("O2", OrderStatus::Clearing, Slot::hourly(10, 4.0));
  h.seed_order("O3", OrderStatus::Clearing, Slot::hourly(10, 1.0));

  h.coordinator.accept_order(&caller(PROVIDER), "O2").await.unwrap();
  let err = h.coordinator.accept_order(&caller(PROVIDER), "O3").await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
#[serial]
async fn clearing_orders_do_not_block_acceptance() {
  let h = Harness::new();
  h.seed_order("O1", OrderStatus::Clearing, Slot::full_days(10, 10));
  h.seed_order("O2", OrderStatus::Clearing, Slot::full_days(10, 10));

  h.coordinator.accept_order(&caller(PROVIDER), "O2").await.unwrap();
  let err = h.coordinator.accept_order(&caller(PROVIDER), "O1").await.unwrap_err();
  assert!(err.to_string().contains("O2"));
}

#[tokio::test]
#[serial]
async fn concurrent_accepts_of_overlapping_orders_admit_one() {
  let h = Harness::new();
  h.seed_order("O1", OrderStatus::Clearing, Slot::full_days(10, 10));
  h.seed_order("O2", OrderStatus::Clearing, Slot::full_days(10, 10));
  let provider = caller(PROVIDER);

  let (a, b) = tokio::join!(
    h.coordinator.accept_order(&provider, "O1"),
    h.coordinator.accept_order(&provider, "O2"),
  );

  assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
  let active = ["O1", "O2"]
    .iter()
    .filter(|id| h.order(id).status == OrderStatus::Active)
    .count();
  assert_eq!(active, 1);
}

#[tokio::test]
#[serial]
async fn only_the_provider_decides() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));

  let by_customer = h.coordinator.accept_order(&caller(CUSTOMER), "o1").await.unwrap_err();
  assert_eq!(by_customer.kind(), ErrorKind::PermissionDenied);

  let reject_by_customer = h
    .coordinator
    .reject_order(&caller(CUSTOMER), "o1", "changed my mind")
    .await
    .unwrap_err();
  assert_eq!(reject_by_customer.kind(), ErrorKind::PermissionDenied);
  assert!(h.payments.refunds().is_empty());

  let missing = h.coordinator.accept_order(&caller(PROVIDER), "nope").await.unwrap_err();
  assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[tokio::test]
#[serial]
async fn rejection_refunds_and_locks_the_chat() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));

  let order = h
    .coordinator
    .reject_order(&caller(PROVIDER), "o1", "  fully booked  ")
    .await
    .unwrap();

  let refunds = h.payments.refunds();
  assert_eq!(refunds.len(), 1);
  assert_eq!(refunds[0].payment_intent_id, "pi_o1");

  assert_eq!(order.status, OrderStatus::RejectedByProvider);
  let stored = h.order("o1");
  assert_eq!(stored.status, OrderStatus::RejectedByProvider);
  assert_eq!(stored.rejection_reason.as_deref(), Some("fully booked"));
  assert_eq!(stored.refund_id.as_deref(), Some(refunds[0].id.as_str()));
  assert!(h.store.snapshot::<ChatRecord>("o1").unwrap().is_locked);

  assert!(matches!(
    h.notifier.sent().as_slice(),
    [Notification::OrderRejected { reason, .. }] if reason == "fully booked"
  ));
}

#[tokio::test]
#[serial]
async fn refund_failure_leaves_the_order_untouched() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));
  h.payments.fail_refunds(true);

  let err = h
    .coordinator
    .reject_order(&caller(PROVIDER), "o1", "fully booked")
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Internal);
  let stored = h.order("o1");
  assert_eq!(stored.status, OrderStatus::Clearing);
  assert!(stored.refund_id.is_none());
  assert!(stored.rejection_reason.is_none());
  assert!(stored.pending_decision.is_none());

  // The released claim lets the provider still accept.
  let order = h.coordinator.accept_order(&caller(PROVIDER), "o1").await.unwrap();
  assert_eq!(order.status, OrderStatus::Active);
}

#[tokio::test]
#[serial]
async fn accept_during_a_pending_refund_is_refused() {
  let h = Harness::with(
    MockPaymentProcessor::with_latency(Duration::from_millis(200)),
    RecordingNotifier::new(),
    BillingPolicy::default(),
  );
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));
  let provider = caller(PROVIDER);

  let (rejected, accepted) = tokio::join!(
    h.coordinator.reject_order(&provider, "o1", "fully booked"),
    async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      h.coordinator.accept_order(&provider, "o1").await
    }
  );

  assert_eq!(rejected.unwrap().status, OrderStatus::RejectedByProvider);
  assert_eq!(accepted.unwrap_err().kind(), ErrorKind::FailedPrecondition);
  let stored = h.order("o1");
  assert_eq!(stored.status, OrderStatus::RejectedByProvider);
  assert!(stored.pending_decision.is_none());
  assert_eq!(h.payments.refunds().len(), 1);
  assert!(!h
    .notifier
    .sent()
    .iter()
    .any(|n| matches!(n, Notification::OrderAccepted { .. })));
}

#[tokio::test]
#[serial]
async fn empty_reason_is_refused_before_any_refund() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));

  let err = h.coordinator.reject_order(&caller(PROVIDER), "o1", "   ").await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::InvalidArgument);
  assert!(h.payments.refunds().is_empty());
}

#[tokio::test]
#[serial]
async fn accepted_order_can_no_longer_be_rejected() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));

  h.coordinator.accept_order(&caller(PROVIDER), "o1").await.unwrap();
  let err = h
    .coordinator
    .reject_order(&caller(PROVIDER), "o1", "too late")
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
  assert!(h.payments.refunds().is_empty());
  assert_eq!(h.order("o1").status, OrderStatus::Active);
}

#[tokio::test]
#[serial]
async fn fulfilment_runs_from_active_to_completed() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Active, Slot::full_days(10, 10));

  let early = h.coordinator.complete_order(&caller(PROVIDER), "o1").await.unwrap_err();
  assert_eq!(early.kind(), ErrorKind::PermissionDenied);

  let started = h.coordinator.start_work(&caller(PROVIDER), "o1").await.unwrap();
  assert_eq!(started.status, OrderStatus::InProgress);
  let twice = h.coordinator.start_work(&caller(PROVIDER), "o1").await.unwrap_err();
  assert_eq!(twice.kind(), ErrorKind::FailedPrecondition);

  let done = h.coordinator.complete_order(&caller(CUSTOMER), "o1").await.unwrap();
  assert_eq!(done.status, OrderStatus::Completed);
  assert!(h
    .notifier
    .sent()
    .contains(&Notification::OrderCompleted {
      order_id: "o1".into(),
      provider_id: PROVIDER.into()
    }));
}

#[tokio::test]
#[serial]
async fn orders_are_visible_to_their_parties_only() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Active, Slot::full_days(10, 10));

  assert_eq!(h.coordinator.get_order(&caller(CUSTOMER), "o1").await.unwrap().order_id, "o1");
  assert_eq!(h.coordinator.get_order(&caller(PROVIDER), "o1").await.unwrap().order_id, "o1");
  let err = h.coordinator.get_order(&caller("nosy"), "o1").await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
#[serial]
async fn failing_notifier_does_not_fail_the_transition() {
  let h = Harness::with(MockPaymentProcessor::new(), RecordingNotifier::failing(), BillingPolicy::default());
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));

  let order = h.coordinator.accept_order(&caller(PROVIDER), "o1").await.unwrap();
  assert_eq!(order.status, OrderStatus::Active);
}

#[tokio::test]
#[serial]
async fn disabled_notifications_skip_delivery() {
  let policy = BillingPolicy {
    notifications_enabled: false,
    ..BillingPolicy::default()
  };
  let h = Harness::with(MockPaymentProcessor::new(), RecordingNotifier::new(), policy);
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));

  h.coordinator.accept_order(&caller(PROVIDER), "o1").await.unwrap();
  assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
#[serial]
async fn search_counts_clearing_orders_as_busy() {
  let h = Harness::new();
  h.seed_order("o1", OrderStatus::Clearing, Slot::full_days(10, 10));
  let candidate = BookingWindow {
    order_id: "new".into(),
    start_at: Some(day(10, 9)),
    end_at: None,
    kind: BookingKind::FullDay,
    hours: None,
  };

  let availability = h.coordinator.check_availability(PROVIDER, &candidate).await.unwrap();
  assert!(!availability.is_available());

  let free = h
    .coordinator
    .available_providers(&[PROVIDER.to_string(), "provider-2".to_string()], &candidate)
    .await;
  assert_eq!(free, vec!["provider-2".to_string()]);
}
