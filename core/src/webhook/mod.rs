// escrow-core/src/webhook/mod.rs

//! Processor event consumption.
//!
//! An event is classified from its type and intent metadata, then applied in one
//! transaction that also records the event id in `processedEvents`. A redelivered
//! event finds its record and changes nothing.

pub mod signature;

pub use signature::{sign, verify_signature, SignatureError, DEFAULT_TOLERANCE_SECS};

use crate::coordinator::Deps;
use crate::error::{CoreError, CoreResult};
use crate::escrow::metadata;
use crate::model::{ChatRecord, Draft, DraftStatus, Order, OrderStatus, ProcessedEvent, ProcessorEvent};
use crate::ports::notifier::Notification;
use crate::ports::store::{run_transaction, Transaction, TransactionExt};
use crate::workflow::{ContextData, Pipeline, PipelineControl, Workflows};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

const WEBHOOK_ACTOR: &str = "payment-webhook";

/// Checks the signature header and decodes the payload.
pub fn verified_event(payload: &[u8], header: &str, secret: &str, now: DateTime<Utc>) -> CoreResult<ProcessorEvent> {
  verify_signature(payload, header, secret, now, DEFAULT_TOLERANCE_SECS)?;
  ProcessorEvent::from_slice(payload)
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
  BookingPaid {
    draft_id: String,
    payment_intent_id: String,
    amount_in_cents: Option<i64>,
  },
  BookingPaymentFailed {
    draft_id: String,
    message: String,
  },
  AdditionalHoursPaid {
    order_id: String,
    amount_in_cents: i64,
  },
  Unhandled {
    reason: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
  Processed {
    #[serde(rename = "orderId", skip_serializing_if = "Option::is_none")]
    order_id: Option<String>,
  },
  Duplicate,
  Ignored {
    reason: String,
  },
}

impl WebhookOutcome {
  pub fn label(&self) -> String {
    match self {
      WebhookOutcome::Processed { .. } => "processed".to_string(),
      WebhookOutcome::Duplicate => "duplicate".to_string(),
      WebhookOutcome::Ignored { reason } => format!("ignored: {reason}"),
    }
  }

  fn ignored(reason: impl Into<String>) -> Self {
    WebhookOutcome::Ignored { reason: reason.into() }
  }
}

fn is_booking(event: &ProcessorEvent) -> bool {
  event
    .metadata(metadata::KIND)
    .map_or(true, |kind| kind == metadata::KIND_BOOKING)
}

/// Maps an event onto the state change it asks for.
pub fn classify(event: &ProcessorEvent) -> EventRoute {
  let unhandled = |reason: String| EventRoute::Unhandled { reason };
  match event.event_type.as_str() {
    PAYMENT_SUCCEEDED => {
      if event.metadata(metadata::KIND) == Some(metadata::KIND_ADDITIONAL_HOURS) {
        return match (event.metadata(metadata::ORDER_ID), event.amount()) {
          (Some(order_id), Some(amount)) if amount > 0 => EventRoute::AdditionalHoursPaid {
            order_id: order_id.to_string(),
            amount_in_cents: amount,
          },
          (None, _) => unhandled("additional-hours payment without an order id".to_string()),
          _ => unhandled("additional-hours payment without an amount".to_string()),
        };
      }
      if !is_booking(event) {
        return unhandled("payment of an unknown kind".to_string());
      }
      match (event.metadata(metadata::DRAFT_ID), event.object_id()) {
        (Some(draft_id), Some(pi)) => EventRoute::BookingPaid {
          draft_id: draft_id.to_string(),
          payment_intent_id: pi.to_string(),
          amount_in_cents: event.amount(),
        },
        (None, _) => unhandled("booking payment without a draft id".to_string()),
        (_, None) => unhandled("payment event without an intent id".to_string()),
      }
    }
    PAYMENT_FAILED => match event.metadata(metadata::DRAFT_ID) {
      Some(draft_id) if is_booking(event) => EventRoute::BookingPaymentFailed {
        draft_id: draft_id.to_string(),
        message: event.failure_message().unwrap_or_else(|| "payment failed".to_string()),
      },
      _ => unhandled("failed payment that is not a booking".to_string()),
    },
    other => unhandled(format!("event type '{other}' is not handled")),
  }
}

pub struct WebhookCtx {
  pub deps: Deps,
  pub event: ProcessorEvent,
  pub route: Option<EventRoute>,
  pub outcome: Option<WebhookOutcome>,
  pub notifications: Vec<Notification>,
}

impl WebhookCtx {
  pub fn new(deps: Deps, event: ProcessorEvent) -> Self {
    Self {
      deps,
      event,
      route: None,
      outcome: None,
      notifications: Vec::new(),
    }
  }
}

type Applied = (WebhookOutcome, Vec<Notification>);

pub(crate) fn register(workflows: &Workflows<CoreError>) {
  let mut p = Pipeline::<WebhookCtx, CoreError>::new(&[
    ("classify_event", false, None),
    ("apply_event", false, None),
    ("notify_parties", true, None),
  ]);

  p.on_step("classify_event", |ctx: ContextData<WebhookCtx>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      let route = classify(&guard.event);
      if let EventRoute::Unhandled { reason } = &route {
        info!(event_id = %guard.event.id, %reason, "Event acknowledged without action.");
        guard.outcome = Some(WebhookOutcome::ignored(reason.clone()));
        return Ok::<_, CoreError>(PipelineControl::Stop);
      }
      guard.route = Some(route);
      Ok(PipelineControl::Continue)
    })
  });

  p.on_step("apply_event", apply_event);

  p.on_step("notify_parties", |ctx: ContextData<WebhookCtx>| {
    Box::pin(async move {
      let (deps, notifications) = {
        let mut guard = ctx.write();
        (guard.deps.clone(), std::mem::take(&mut guard.notifications))
      };
      for notification in notifications {
        deps.notify(notification).await;
      }
      Ok::<_, CoreError>(PipelineControl::Continue)
    })
  });

  workflows.register(p);
}

async fn apply_event(ctx: ContextData<WebhookCtx>) -> CoreResult<PipelineControl> {
  let (deps, event_id, event_type, route) = {
    let guard = ctx.read();
    (
      guard.deps.clone(),
      guard.event.id.clone(),
      guard.event.event_type.clone(),
      guard.route.clone(),
    )
  };
  let route = route.ok_or_else(|| CoreError::Internal("Event reached apply without a route.".to_string()))?;
  let (deps_ref, route_ref, event_id_ref, event_type_ref) = (&deps, &route, event_id.as_str(), event_type.as_str());

  let (outcome, notifications) = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps_ref.now();
    let mut tx = deps_ref.store.begin().await?;
    if let Some(seen) = tx.load::<ProcessedEvent>(event_id_ref).await? {
      debug!(processed_at = %seen.processed_at, "Event already consumed.");
      return Ok((WebhookOutcome::Duplicate, Vec::new()));
    }

    let (outcome, notifications) = match route_ref {
      EventRoute::BookingPaid {
        draft_id,
        payment_intent_id,
        amount_in_cents,
      } => apply_booking_paid(&mut *tx, draft_id, payment_intent_id, *amount_in_cents, now).await?,
      EventRoute::BookingPaymentFailed { draft_id, message } => {
        apply_booking_failed(&mut *tx, draft_id, message, now).await?
      }
      EventRoute::AdditionalHoursPaid {
        order_id,
        amount_in_cents,
      } => apply_additional_hours_paid(&mut *tx, order_id, *amount_in_cents, now).await?,
      EventRoute::Unhandled { reason } => (WebhookOutcome::ignored(reason.clone()), Vec::new()),
    };

    tx.save(&ProcessedEvent {
      event_id: event_id_ref.to_string(),
      event_type: event_type_ref.to_string(),
      outcome: outcome.label(),
      processed_at: now,
    })?;
    tx.commit().await?;
    Ok((outcome, notifications))
  })
  .await?;

  info!(%event_id, outcome = %outcome.label(), "Event consumed.");
  let mut guard = ctx.write();
  guard.outcome = Some(outcome);
  guard.notifications = notifications;
  Ok(PipelineControl::Continue)
}

async fn apply_booking_paid(
  tx: &mut dyn Transaction,
  draft_id: &str,
  payment_intent_id: &str,
  amount_in_cents: Option<i64>,
  now: DateTime<Utc>,
) -> CoreResult<Applied> {
  let Some(mut draft) = tx.load::<Draft>(draft_id).await? else {
    warn!(%draft_id, "Payment succeeded for an unknown draft.");
    return Ok((WebhookOutcome::ignored(format!("draft {draft_id} not found")), Vec::new()));
  };
  if draft.is_converted() {
    debug!(%draft_id, order_id = ?draft.converted_to_order_id, "Draft already converted.");
    return Ok((WebhookOutcome::Duplicate, Vec::new()));
  }

  let order_id = Uuid::new_v4().to_string();
  let paid = amount_in_cents.filter(|a| *a > 0).unwrap_or(draft.price_in_cents);
  let mut order = draft.materialize(&order_id, payment_intent_id, paid, now);
  order.transition(OrderStatus::Clearing, WEBHOOK_ACTOR, now)?;

  draft.status = DraftStatus::Converted;
  draft.converted_to_order_id = Some(order_id.clone());
  draft.last_payment_error = None;
  draft.updated_at = now;

  tx.save(&order)?;
  tx.save(&draft)?;
  tx.save(&ChatRecord::for_order(&order, true, now))?;
  info!(%draft_id, %order_id, "Order created from paid draft.");

  let notification = Notification::OrderPaid {
    order_id: order_id.clone(),
    provider_id: order.provider_id.clone(),
  };
  Ok((
    WebhookOutcome::Processed {
      order_id: Some(order_id),
    },
    vec![notification],
  ))
}

async fn apply_booking_failed(tx: &mut dyn Transaction, draft_id: &str, message: &str, now: DateTime<Utc>) -> CoreResult<Applied> {
  let Some(mut draft) = tx.load::<Draft>(draft_id).await? else {
    warn!(%draft_id, "Payment failed for an unknown draft.");
    return Ok((WebhookOutcome::ignored(format!("draft {draft_id} not found")), Vec::new()));
  };
  if draft.is_converted() {
    return Ok((
      WebhookOutcome::ignored(format!("draft {draft_id} was already paid")),
      Vec::new(),
    ));
  }
  draft.status = DraftStatus::PaymentFailed;
  draft.last_payment_error = Some(message.to_string());
  draft.updated_at = now;
  tx.save(&draft)?;
  info!(%draft_id, "Draft payment failed.");
  Ok((WebhookOutcome::Processed { order_id: None }, Vec::new()))
}

async fn apply_additional_hours_paid(
  tx: &mut dyn Transaction,
  order_id: &str,
  amount_in_cents: i64,
  now: DateTime<Utc>,
) -> CoreResult<Applied> {
  let Some(mut order) = tx.load::<Order>(order_id).await? else {
    warn!(%order_id, "Additional-hours payment for an unknown order.");
    return Ok((WebhookOutcome::ignored(format!("order {order_id} not found")), Vec::new()));
  };
  order.total_paid_in_cents += amount_in_cents;
  order.last_updated_at = now;
  tx.save(&order)?;
  info!(%order_id, amount_in_cents, total_paid = order.total_paid_in_cents, "Additional-hours payment credited.");
  Ok((
    WebhookOutcome::Processed {
      order_id: Some(order.order_id),
    },
    Vec::new(),
  ))
}
