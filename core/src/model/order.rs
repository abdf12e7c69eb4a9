// escrow-core/src/model/order.rs

use crate::error::{CoreError, CoreResult};
use crate::ports::store::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative order status. The serialized names are the values stored in existing
/// order documents and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
  /// Draft-side only: payment intent created, not yet captured.
  #[serde(rename = "pending_payment_setup")]
  PendingPaymentSetup,
  #[serde(rename = "bezahlt")]
  Paid,
  /// Paid and waiting for the provider's decision.
  #[serde(rename = "zahlung_erhalten_clearing")]
  Clearing,
  #[serde(rename = "AKTIV")]
  Active,
  #[serde(rename = "IN BEARBEITUNG")]
  InProgress,
  #[serde(rename = "abgelehnt_vom_anbieter")]
  RejectedByProvider,
  #[serde(rename = "ABGESCHLOSSEN")]
  Completed,
  #[serde(rename = "STORNIERT")]
  Cancelled,
  #[serde(rename = "FEHLENDE DETAILS")]
  MissingDetails,
}

impl OrderStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      OrderStatus::PendingPaymentSetup => "pending_payment_setup",
      OrderStatus::Paid => "bezahlt",
      OrderStatus::Clearing => "zahlung_erhalten_clearing",
      OrderStatus::Active => "AKTIV",
      OrderStatus::InProgress => "IN BEARBEITUNG",
      OrderStatus::RejectedByProvider => "abgelehnt_vom_anbieter",
      OrderStatus::Completed => "ABGESCHLOSSEN",
      OrderStatus::Cancelled => "STORNIERT",
      OrderStatus::MissingDetails => "FEHLENDE DETAILS",
    }
  }

  /// The statuses directly reachable from `self`.
  pub fn successors(&self) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match self {
      PendingPaymentSetup => &[Paid],
      Paid => &[Clearing],
      Clearing => &[Active, RejectedByProvider],
      Active => &[InProgress, Completed, Cancelled],
      InProgress => &[Completed, Cancelled],
      RejectedByProvider | Completed | Cancelled | MissingDetails => &[],
    }
  }

  pub fn can_transition_to(&self, next: OrderStatus) -> bool {
    self.successors().contains(&next)
  }

  pub fn is_terminal(&self) -> bool {
    self.successors().is_empty()
  }
}

impl std::fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
  /// Bounded by a number of hours per day; several may share a day up to the cap.
  Hourly,
  /// Occupies the provider for every day of the window.
  FullDay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
  pub from: Option<OrderStatus>,
  pub to: OrderStatus,
  pub actor: String,
  pub at: DateTime<Utc>,
}

/// Claim written before a rejection refunds the payment. Other decisions on the order
/// are refused until the claim is committed or released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDecision {
  pub kind: DecisionKind,
  pub claimed_by: String,
  pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
  Rejecting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub order_id: String,
  pub draft_id: String,
  pub customer_id: String,
  pub provider_id: String,
  pub category: String,
  pub booking_kind: BookingKind,
  #[serde(default)]
  pub booked_hours: Option<f64>,
  pub price_in_cents: i64,
  pub total_paid_in_cents: i64,
  pub currency: String,
  pub payment_intent_id: String,
  #[serde(default)]
  pub refund_id: Option<String>,
  #[serde(default)]
  pub start_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub end_at: Option<DateTime<Utc>>,
  pub status: OrderStatus,
  pub created_at: DateTime<Utc>,
  pub last_updated_at: DateTime<Utc>,
  #[serde(default)]
  pub rejection_reason: Option<String>,
  #[serde(default)]
  pub fixed_by_admin: Option<bool>,
  /// Set while a provider decision with side effects at the processor is in flight.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pending_decision: Option<PendingDecision>,
  #[serde(default)]
  pub status_history: Vec<StatusChange>,
}

impl Order {
  /// Moves the order along one edge of the status graph and records the change.
  pub fn transition(&mut self, next: OrderStatus, actor: &str, at: DateTime<Utc>) -> CoreResult<()> {
    if !self.status.can_transition_to(next) {
      return Err(CoreError::FailedPrecondition(format!(
        "Order {} cannot move from '{}' to '{}'.",
        self.order_id, self.status, next
      )));
    }
    self.status_history.push(StatusChange {
      from: Some(self.status),
      to: next,
      actor: actor.to_string(),
      at,
    });
    self.status = next;
    self.last_updated_at = at;
    Ok(())
  }

  pub fn is_party(&self, user_id: &str) -> bool {
    self.customer_id == user_id || self.provider_id == user_id
  }
}

impl Document for Order {
  const COLLECTION: Collection = Collection::Orders;

  fn document_id(&self) -> &str {
    &self.order_id
  }
}

/// Order-scoped chat channel state; only the lock flag is owned here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
  pub order_id: String,
  pub customer_id: String,
  pub provider_id: String,
  pub is_locked: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl ChatRecord {
  pub fn for_order(order: &Order, is_locked: bool, now: DateTime<Utc>) -> Self {
    Self {
      order_id: order.order_id.clone(),
      customer_id: order.customer_id.clone(),
      provider_id: order.provider_id.clone(),
      is_locked,
      created_at: now,
      updated_at: now,
    }
  }
}

impl Document for ChatRecord {
  const COLLECTION: Collection = Collection::Chats;

  fn document_id(&self) -> &str {
    &self.order_id
  }
}
