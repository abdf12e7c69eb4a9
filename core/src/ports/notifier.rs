// escrow-core/src/ports/notifier.rs

use async_trait::async_trait;
use serde::Serialize;

/// Outbound messages to the parties of an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
  OrderPaid {
    order_id: String,
    provider_id: String,
  },
  OrderAccepted {
    order_id: String,
    customer_id: String,
  },
  OrderRejected {
    order_id: String,
    customer_id: String,
    reason: String,
  },
  OrderCompleted {
    order_id: String,
    provider_id: String,
  },
  HoursSubmitted {
    order_id: String,
    customer_id: String,
    approval_request_id: String,
    total_hours: f64,
  },
  ApprovalDecided {
    order_id: String,
    provider_id: String,
    approval_request_id: String,
    decision: String,
  },
  HoursBilled {
    order_id: String,
    customer_id: String,
    amount_in_cents: i64,
  },
}

impl Notification {
  pub fn recipient(&self) -> &str {
    match self {
      Notification::OrderPaid { provider_id, .. }
      | Notification::OrderCompleted { provider_id, .. }
      | Notification::ApprovalDecided { provider_id, .. } => provider_id,
      Notification::OrderAccepted { customer_id, .. }
      | Notification::OrderRejected { customer_id, .. }
      | Notification::HoursSubmitted { customer_id, .. }
      | Notification::HoursBilled { customer_id, .. } => customer_id,
    }
  }

  pub fn order_id(&self) -> &str {
    match self {
      Notification::OrderPaid { order_id, .. }
      | Notification::OrderAccepted { order_id, .. }
      | Notification::OrderRejected { order_id, .. }
      | Notification::OrderCompleted { order_id, .. }
      | Notification::HoursSubmitted { order_id, .. }
      | Notification::ApprovalDecided { order_id, .. }
      | Notification::HoursBilled { order_id, .. } => order_id,
    }
  }

  pub fn subject(&self) -> String {
    match self {
      Notification::OrderPaid { order_id, .. } => format!("New paid booking {order_id} awaits your decision"),
      Notification::OrderAccepted { order_id, .. } => format!("Your booking {order_id} was accepted"),
      Notification::OrderRejected { order_id, .. } => format!("Your booking {order_id} was declined and refunded"),
      Notification::OrderCompleted { order_id, .. } => format!("Booking {order_id} was marked as completed"),
      Notification::HoursSubmitted { order_id, total_hours, .. } => {
        format!("{total_hours:.2} hours on booking {order_id} need your approval")
      }
      Notification::ApprovalDecided { order_id, decision, .. } => {
        format!("Hours on booking {order_id} were {decision}")
      }
      Notification::HoursBilled { order_id, amount_in_cents, .. } => {
        format!("Additional hours on booking {order_id} billed ({amount_in_cents} cents)")
      }
    }
  }
}

/// Fire-and-forget delivery. Failures are logged by the caller and never affect the
/// operation that triggered the notification.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}
