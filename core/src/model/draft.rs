// escrow-core/src/model/draft.rs

use super::order::{BookingKind, Order, OrderStatus, StatusChange};
use crate::ports::store::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
  PendingPaymentSetup,
  PaymentFailed,
  /// Consumed by a successful payment; `converted_to_order_id` points at the order.
  Converted,
}

/// Pre-payment staging record of a proposed booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
  pub draft_id: String,
  pub customer_id: String,
  pub provider_id: String,
  pub category: String,
  pub price_in_cents: i64,
  pub currency: String,
  pub booking_kind: BookingKind,
  #[serde(default)]
  pub booked_hours: Option<f64>,
  #[serde(default)]
  pub start_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub end_at: Option<DateTime<Utc>>,
  pub status: DraftStatus,
  #[serde(default)]
  pub converted_to_order_id: Option<String>,
  #[serde(default)]
  pub last_payment_error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Draft {
  pub fn is_converted(&self) -> bool {
    self.status == DraftStatus::Converted || self.converted_to_order_id.is_some()
  }

  /// Builds the order a captured payment turns this draft into. The order starts at
  /// `bezahlt` and is advanced to clearing, both steps recorded in its history.
  pub fn materialize(&self, order_id: &str, payment_intent_id: &str, amount_paid: i64, at: DateTime<Utc>) -> Order {
    let actor = "payment-webhook".to_string();
    Order {
      order_id: order_id.to_string(),
      draft_id: self.draft_id.clone(),
      customer_id: self.customer_id.clone(),
      provider_id: self.provider_id.clone(),
      category: self.category.clone(),
      booking_kind: self.booking_kind,
      booked_hours: self.booked_hours,
      price_in_cents: self.price_in_cents,
      total_paid_in_cents: amount_paid,
      currency: self.currency.clone(),
      payment_intent_id: payment_intent_id.to_string(),
      refund_id: None,
      start_at: self.start_at,
      end_at: self.end_at,
      status: OrderStatus::Paid,
      created_at: at,
      last_updated_at: at,
      rejection_reason: None,
      fixed_by_admin: None,
      pending_decision: None,
      status_history: vec![StatusChange {
        from: Some(OrderStatus::PendingPaymentSetup),
        to: OrderStatus::Paid,
        actor,
        at,
      }],
    }
  }
}

impl Document for Draft {
  const COLLECTION: Collection = Collection::Drafts;

  fn document_id(&self) -> &str {
    &self.draft_id
  }
}
