// tests/common/mod.rs
#![allow(dead_code)] // Each test binary uses a different subset of the harness.

use chrono::{DateTime, Duration, TimeZone, Utc};
use escrow_core::memory::{InMemoryStore, ManualClock, MockPaymentProcessor, RecordingNotifier};
use escrow_core::model::{BookingKind, Draft, DraftStatus, Order, OrderStatus, ProviderProfile, StatusChange};
use escrow_core::model::ProcessorEvent;
use escrow_core::{BillingPolicy, Caller, Coordinator, Deps};
use serde_json::json;
use std::sync::Arc;
use tracing::Level;

pub const CUSTOMER: &str = "customer-1";
pub const PROVIDER: &str = "provider-1";

/// Calendar day `d` of May 2024 at `hour`:00 UTC.
pub fn day(d: u32, hour: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, d, hour, 0, 0).unwrap()
}

pub fn caller(id: &str) -> Caller {
  Caller::new(id).unwrap()
}

/// A booking window; `hours == None` means a full-day booking.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
  pub from_day: u32,
  pub to_day: u32,
  pub hours: Option<f64>,
}

impl Slot {
  pub fn full_days(from_day: u32, to_day: u32) -> Self {
    Self {
      from_day,
      to_day,
      hours: None,
    }
  }

  pub fn hourly(on_day: u32, hours: f64) -> Self {
    Self {
      from_day: on_day,
      to_day: on_day,
      hours: Some(hours),
    }
  }

  fn kind(&self) -> BookingKind {
    if self.hours.is_some() {
      BookingKind::Hourly
    } else {
      BookingKind::FullDay
    }
  }
}

/// In-memory collaborators wired into a coordinator, with handles kept for
/// inspection.
pub struct Harness {
  pub store: Arc<InMemoryStore>,
  pub payments: Arc<MockPaymentProcessor>,
  pub notifier: Arc<RecordingNotifier>,
  pub clock: Arc<ManualClock>,
  pub coordinator: Coordinator,
}

impl Harness {
  pub fn new() -> Self {
    Self::with(MockPaymentProcessor::new(), RecordingNotifier::new(), BillingPolicy::default())
  }

  pub fn with(payments: MockPaymentProcessor, notifier: RecordingNotifier, policy: BillingPolicy) -> Self {
    setup_tracing();
    let store = Arc::new(InMemoryStore::new());
    let payments = Arc::new(payments);
    let notifier = Arc::new(notifier);
    let clock = Arc::new(ManualClock::new(day(1, 8)));
    let deps = Deps::new(store.clone(), payments.clone(), notifier.clone(), clock.clone(), policy);
    let coordinator = Coordinator::new(deps).expect("valid policy");
    Self {
      store,
      payments,
      notifier,
      clock,
      coordinator,
    }
  }

  pub fn deps(&self) -> &Deps {
    self.coordinator.deps()
  }

  /// Stores a provider profile with a connected account and registers the account
  /// with the processor. Returns the account id.
  pub fn seed_provider(&self, provider_id: &str, charges_enabled: bool) -> String {
    let account_id = format!("acct_{provider_id}");
    self.payments.add_account(&account_id, charges_enabled);
    self
      .store
      .insert(&ProviderProfile {
        provider_id: provider_id.to_string(),
        email: Some(format!("{provider_id}@example.com")),
        connected_account_id: Some(account_id.clone()),
        updated_at: day(1, 0),
      })
      .unwrap();
    account_id
  }

  pub fn seed_draft(&self, draft_id: &str, price_in_cents: i64, slot: Slot) -> Draft {
    let draft = Draft {
      draft_id: draft_id.to_string(),
      customer_id: CUSTOMER.to_string(),
      provider_id: PROVIDER.to_string(),
      category: "gardening".to_string(),
      price_in_cents,
      currency: "eur".to_string(),
      booking_kind: slot.kind(),
      booked_hours: slot.hours,
      start_at: Some(day(slot.from_day, 9)),
      end_at: Some(day(slot.to_day, 17)),
      status: DraftStatus::PendingPaymentSetup,
      converted_to_order_id: None,
      last_payment_error: None,
      created_at: day(1, 0),
      updated_at: day(1, 0),
    };
    self.store.insert(&draft).unwrap();
    draft
  }

  pub fn seed_order(&self, order_id: &str, status: OrderStatus, slot: Slot) -> Order {
    let order = Order {
      order_id: order_id.to_string(),
      draft_id: format!("draft-{order_id}"),
      customer_id: CUSTOMER.to_string(),
      provider_id: PROVIDER.to_string(),
      category: "gardening".to_string(),
      booking_kind: slot.kind(),
      booked_hours: slot.hours,
      price_in_cents: 20_000,
      total_paid_in_cents: 20_000,
      currency: "eur".to_string(),
      payment_intent_id: format!("pi_{order_id}"),
      refund_id: None,
      start_at: Some(day(slot.from_day, 9)),
      end_at: Some(day(slot.to_day, 17)),
      status,
      created_at: day(1, 0),
      last_updated_at: day(1, 0),
      rejection_reason: None,
      fixed_by_admin: None,
      pending_decision: None,
      status_history: vec![StatusChange {
        from: None,
        to: status,
        actor: "seed".to_string(),
        at: day(1, 0),
      }],
    };
    self.store.insert(&order).unwrap();
    order
  }

  pub fn order(&self, order_id: &str) -> Order {
    self.store.snapshot::<Order>(order_id).expect("order exists")
  }

  pub fn draft(&self, draft_id: &str) -> Draft {
    self.store.snapshot::<Draft>(draft_id).expect("draft exists")
  }

  pub fn advance(&self, by: Duration) {
    self.clock.advance(by);
  }
}

pub fn payment_succeeded(event_id: &str, payment_intent_id: &str, draft_id: &str, amount: i64) -> ProcessorEvent {
  serde_json::from_value(json!({
    "id": event_id,
    "type": "payment_intent.succeeded",
    "data": { "object": {
      "id": payment_intent_id,
      "amount": amount,
      "amount_received": amount,
      "metadata": { "kind": "booking", "draftId": draft_id }
    }}
  }))
  .unwrap()
}

pub fn additional_hours_paid(event_id: &str, order_id: &str, amount: i64) -> ProcessorEvent {
  serde_json::from_value(json!({
    "id": event_id,
    "type": "payment_intent.succeeded",
    "data": { "object": {
      "id": format!("pi_{event_id}"),
      "amount": amount,
      "amount_received": amount,
      "metadata": { "kind": "additional_hours", "orderId": order_id, "timeEntryIds": "e1,e2" }
    }}
  }))
  .unwrap()
}

pub fn payment_failed(event_id: &str, draft_id: &str, message: &str) -> ProcessorEvent {
  serde_json::from_value(json!({
    "id": event_id,
    "type": "payment_intent.payment_failed",
    "data": { "object": {
      "id": format!("pi_{event_id}"),
      "amount": 10_000,
      "metadata": { "kind": "booking", "draftId": draft_id },
      "last_payment_error": { "message": message }
    }}
  }))
  .unwrap()
}

// --- Helper for Tracing Setup (once per test binary) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
