// escrow-core/src/orders.rs

//! Provider decisions and fulfilment transitions on orders.
//!
//! Every status write is a read-modify-write inside one store transaction. A racing
//! writer makes the commit conflict, the attempt is retried from a fresh read, and
//! the status guard then reports the loser as `FailedPrecondition`.

use crate::availability::{blocking_orders_query, check_availability, Availability, BookingWindow, ACCEPT_BLOCKING_STATUSES};
use crate::coordinator::Deps;
use crate::error::{CoreError, CoreResult};
use crate::escrow;
use crate::model::{Caller, ChatRecord, DecisionKind, Order, OrderStatus, PendingDecision};
use crate::ports::notifier::Notification;
use crate::ports::payments::Refund;
use crate::ports::store::{run_transaction, Transaction, TransactionExt};
use crate::workflow::{ContextData, Pipeline, PipelineControl, SkipCondition, Workflows};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument};

pub struct AcceptOrderCtx {
  pub deps: Deps,
  pub caller: Caller,
  pub order_id: String,
  pub order: Option<Order>,
}

impl AcceptOrderCtx {
  pub fn new(deps: Deps, caller: Caller, order_id: &str) -> Self {
    Self {
      deps,
      caller,
      order_id: order_id.to_string(),
      order: None,
    }
  }
}

pub struct RejectOrderCtx {
  pub deps: Deps,
  pub caller: Caller,
  pub order_id: String,
  pub reason: String,
  pub payment_intent_id: Option<String>,
  pub refund: Option<Refund>,
  pub order: Option<Order>,
}

impl RejectOrderCtx {
  pub fn new(deps: Deps, caller: Caller, order_id: &str, reason: &str) -> Self {
    Self {
      deps,
      caller,
      order_id: order_id.to_string(),
      reason: reason.trim().to_string(),
      payment_intent_id: None,
      refund: None,
      order: None,
    }
  }
}

pub(crate) async fn load_order(tx: &mut dyn Transaction, order_id: &str) -> CoreResult<Order> {
  tx.load::<Order>(order_id)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("Order {order_id} does not exist.")))
}

fn require_provider(order: &Order, caller: &Caller) -> CoreResult<()> {
  if caller.is(&order.provider_id) {
    Ok(())
  } else {
    Err(CoreError::PermissionDenied(format!(
      "Only the provider of order {} can do this.",
      order.order_id
    )))
  }
}

fn require_status(order: &Order, expected: OrderStatus) -> CoreResult<()> {
  if order.status == expected {
    Ok(())
  } else {
    Err(CoreError::FailedPrecondition(format!(
      "Order {} is '{}', expected '{}'.",
      order.order_id, order.status, expected
    )))
  }
}

fn require_no_pending_decision(order: &Order) -> CoreResult<()> {
  match &order.pending_decision {
    None => Ok(()),
    Some(pending) => Err(CoreError::FailedPrecondition(format!(
      "Order {} is already being decided ({:?} since {}).",
      order.order_id, pending.kind, pending.claimed_at
    ))),
  }
}

/// Writes the chat lock flag, creating the record when the order has none yet.
async fn set_chat_lock(tx: &mut dyn Transaction, order: &Order, locked: bool, now: DateTime<Utc>) -> CoreResult<()> {
  let mut chat = tx
    .load::<ChatRecord>(&order.order_id)
    .await?
    .unwrap_or_else(|| ChatRecord::for_order(order, locked, now));
  chat.is_locked = locked;
  chat.updated_at = now;
  tx.save(&chat)
}

pub(crate) fn register(workflows: &Workflows<CoreError>) {
  register_accept(workflows);
  register_reject(workflows);
}

fn register_accept(workflows: &Workflows<CoreError>) {
  let notifications_off: SkipCondition<AcceptOrderCtx> = Arc::new(|ctx: ContextData<AcceptOrderCtx>| {
    let enabled = ctx.read().deps.policy.notifications_enabled;
    !enabled
  });
  let mut p = Pipeline::<AcceptOrderCtx, CoreError>::new(&[
    ("commit_acceptance", false, None),
    ("notify_customer", true, Some(notifications_off)),
  ]);

  p.on_step("commit_acceptance", commit_acceptance);

  p.on_step("notify_customer", |ctx: ContextData<AcceptOrderCtx>| {
    Box::pin(async move {
      let (deps, notification) = {
        let guard = ctx.read();
        let notification = guard.order.as_ref().map(|order| Notification::OrderAccepted {
          order_id: order.order_id.clone(),
          customer_id: order.customer_id.clone(),
        });
        (guard.deps.clone(), notification)
      };
      if let Some(notification) = notification {
        deps.notify(notification).await;
      }
      Ok::<_, CoreError>(PipelineControl::Continue)
    })
  });

  workflows.register(p);
}

async fn commit_acceptance(ctx: ContextData<AcceptOrderCtx>) -> CoreResult<PipelineControl> {
  let (deps, caller, order_id) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.caller.clone(), guard.order_id.clone())
  };
  let (deps_ref, caller_ref, order_id_ref) = (&deps, &caller, order_id.as_str());

  let order = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps_ref.now();
    let mut tx = deps_ref.store.begin().await?;
    let mut order = load_order(&mut *tx, order_id_ref).await?;
    require_provider(&order, caller_ref)?;
    require_status(&order, OrderStatus::Clearing)?;
    require_no_pending_decision(&order)?;

    let blocking: Vec<Order> = tx
      .load_where(blocking_orders_query(&order.provider_id, ACCEPT_BLOCKING_STATUSES))
      .await?;
    let windows: Vec<BookingWindow> = blocking.iter().map(BookingWindow::of_order).collect();
    let candidate = BookingWindow::of_order(&order);
    if let Availability::Conflict { reason, .. } =
      check_availability(&candidate, &windows, deps_ref.policy.daily_hour_cap)
    {
      return Err(CoreError::FailedPrecondition(format!(
        "Order {order_id_ref} cannot be accepted: it {reason}."
      )));
    }

    order.transition(OrderStatus::Active, caller_ref.id(), now)?;
    set_chat_lock(&mut *tx, &order, false, now).await?;
    tx.save(&order)?;
    tx.commit().await?;
    Ok(order)
  })
  .await?;

  info!(order_id = %order.order_id, "Order accepted.");
  ctx.write().order = Some(order);
  Ok(PipelineControl::Continue)
}

fn register_reject(workflows: &Workflows<CoreError>) {
  let notifications_off: SkipCondition<RejectOrderCtx> = Arc::new(|ctx: ContextData<RejectOrderCtx>| {
    let enabled = ctx.read().deps.policy.notifications_enabled;
    !enabled
  });
  let mut p = Pipeline::<RejectOrderCtx, CoreError>::new(&[
    ("validate_rejection", false, None),
    ("refund_payment", false, None),
    ("commit_rejection", false, None),
    ("notify_customer", true, Some(notifications_off)),
  ]);

  p.on_step("validate_rejection", validate_rejection);

  p.on_step("refund_payment", |ctx: ContextData<RejectOrderCtx>| {
    Box::pin(async move {
      let (deps, payment_intent_id) = {
        let guard = ctx.read();
        (guard.deps.clone(), guard.payment_intent_id.clone())
      };
      let payment_intent_id = payment_intent_id
        .ok_or_else(|| CoreError::Internal("Rejection reached refund without a payment intent.".to_string()))?;
      match escrow::refund_payment(&deps, &payment_intent_id).await {
        Ok(refund) => {
          ctx.write().refund = Some(refund);
          Ok::<_, CoreError>(PipelineControl::Continue)
        }
        Err(e) => {
          let order_id = ctx.read().order_id.clone();
          release_rejection_claim(&deps, &order_id).await;
          Err(e)
        }
      }
    })
  });

  p.on_step("commit_rejection", commit_rejection);

  p.on_step("notify_customer", |ctx: ContextData<RejectOrderCtx>| {
    Box::pin(async move {
      let (deps, notification) = {
        let guard = ctx.read();
        let notification = guard.order.as_ref().map(|order| Notification::OrderRejected {
          order_id: order.order_id.clone(),
          customer_id: order.customer_id.clone(),
          reason: guard.reason.clone(),
        });
        (guard.deps.clone(), notification)
      };
      if let Some(notification) = notification {
        deps.notify(notification).await;
      }
      Ok::<_, CoreError>(PipelineControl::Continue)
    })
  });

  workflows.register(p);
}

/// Checks the rejection and claims the order for it in one transaction. Accept refuses
/// a claimed order.
async fn validate_rejection(ctx: ContextData<RejectOrderCtx>) -> CoreResult<PipelineControl> {
  let (deps, caller, order_id, reason) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.caller.clone(), guard.order_id.clone(), guard.reason.clone())
  };
  if reason.is_empty() {
    return Err(CoreError::InvalidArgument("A rejection reason is required.".to_string()));
  }
  let (deps_ref, caller_ref, order_id_ref) = (&deps, &caller, order_id.as_str());

  let payment_intent_id = run_transaction(deps.policy.transaction_attempts, || async move {
    let mut tx = deps_ref.store.begin().await?;
    let mut order = load_order(&mut *tx, order_id_ref).await?;
    require_provider(&order, caller_ref)?;
    require_status(&order, OrderStatus::Clearing)?;
    require_no_pending_decision(&order)?;
    if order.payment_intent_id.is_empty() {
      return Err(CoreError::FailedPrecondition(format!(
        "Order {order_id_ref} has no captured payment to refund."
      )));
    }

    order.pending_decision = Some(PendingDecision {
      kind: DecisionKind::Rejecting,
      claimed_by: caller_ref.id().to_string(),
      claimed_at: deps_ref.now(),
    });
    tx.save(&order)?;
    tx.commit().await?;
    Ok(order.payment_intent_id)
  })
  .await?;

  ctx.write().payment_intent_id = Some(payment_intent_id);
  Ok(PipelineControl::Continue)
}

/// Drops the rejection claim after a failed refund. A failure here is logged; the
/// claim then has to be cleared by reconciliation.
async fn release_rejection_claim(deps: &Deps, order_id: &str) {
  let released = run_transaction(deps.policy.transaction_attempts, || async move {
    let mut tx = deps.store.begin().await?;
    let mut order = load_order(&mut *tx, order_id).await?;
    if order.pending_decision.take().is_some() {
      tx.save(&order)?;
      tx.commit().await?;
    }
    Ok(())
  })
  .await;
  if let Err(e) = released {
    error!(%order_id, error = %e, "Could not release the rejection claim after a failed refund.");
  }
}

async fn commit_rejection(ctx: ContextData<RejectOrderCtx>) -> CoreResult<PipelineControl> {
  let (deps, caller, order_id, reason, refund_id) = {
    let guard = ctx.read();
    (
      guard.deps.clone(),
      guard.caller.clone(),
      guard.order_id.clone(),
      guard.reason.clone(),
      guard.refund.as_ref().map(|r| r.id.clone()),
    )
  };
  let refund_id =
    refund_id.ok_or_else(|| CoreError::Internal("Rejection reached commit without a refund.".to_string()))?;
  let (deps_ref, caller_ref, order_id_ref, reason_ref, refund_ref) =
    (&deps, &caller, order_id.as_str(), reason.as_str(), refund_id.as_str());

  let committed = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps_ref.now();
    let mut tx = deps_ref.store.begin().await?;
    let mut order = load_order(&mut *tx, order_id_ref).await?;
    require_status(&order, OrderStatus::Clearing)?;
    let claimed = matches!(&order.pending_decision, Some(p) if p.kind == DecisionKind::Rejecting);
    if !claimed {
      return Err(CoreError::Internal(format!(
        "Rejection claim on order {order_id_ref} disappeared during the refund."
      )));
    }

    order.pending_decision = None;
    order.transition(OrderStatus::RejectedByProvider, caller_ref.id(), now)?;
    order.rejection_reason = Some(reason_ref.to_string());
    order.refund_id = Some(refund_ref.to_string());
    set_chat_lock(&mut *tx, &order, true, now).await?;
    tx.save(&order)?;
    tx.commit().await?;
    Ok(order)
  })
  .await;

  let order = committed.map_err(|e| {
    error!(%order_id, %refund_id, error = %e, "Refund issued but the rejection was not recorded; needs reconciliation.");
    e
  })?;
  info!(%order_id, %refund_id, "Order rejected and refunded.");
  ctx.write().order = Some(order);
  Ok(PipelineControl::Continue)
}

/// Which party of the order may perform a plain transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
  Customer,
  Provider,
}

async fn transition_order(
  deps: &Deps,
  caller: &Caller,
  order_id: &str,
  actor: Party,
  from: &[OrderStatus],
  to: OrderStatus,
) -> CoreResult<Order> {
  run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps.now();
    let mut tx = deps.store.begin().await?;
    let mut order = load_order(&mut *tx, order_id).await?;
    let allowed = match actor {
      Party::Customer => caller.is(&order.customer_id),
      Party::Provider => caller.is(&order.provider_id),
    };
    if !allowed {
      return Err(CoreError::PermissionDenied(format!(
        "Caller {caller} may not move order {order_id} to '{to}'."
      )));
    }
    if !from.contains(&order.status) {
      return Err(CoreError::FailedPrecondition(format!(
        "Order {order_id} is '{}' and cannot move to '{to}'.",
        order.status
      )));
    }
    order.transition(to, caller.id(), now)?;
    tx.save(&order)?;
    tx.commit().await?;
    Ok(order)
  })
  .await
}

/// Provider starts fulfilment of an accepted order.
#[instrument(name = "orders::start_work", skip(deps), fields(caller = %caller), err(Display))]
pub async fn start_work(deps: &Deps, caller: &Caller, order_id: &str) -> CoreResult<Order> {
  let order = transition_order(
    deps,
    caller,
    order_id,
    Party::Provider,
    &[OrderStatus::Active],
    OrderStatus::InProgress,
  )
  .await?;
  info!("Work started.");
  Ok(order)
}

/// Customer confirms the order as fulfilled.
#[instrument(name = "orders::complete_order", skip(deps), fields(caller = %caller), err(Display))]
pub async fn complete_order(deps: &Deps, caller: &Caller, order_id: &str) -> CoreResult<Order> {
  let order = transition_order(
    deps,
    caller,
    order_id,
    Party::Customer,
    &[OrderStatus::Active, OrderStatus::InProgress],
    OrderStatus::Completed,
  )
  .await?;
  deps
    .notify(Notification::OrderCompleted {
      order_id: order.order_id.clone(),
      provider_id: order.provider_id.clone(),
    })
    .await;
  info!("Order completed.");
  Ok(order)
}
