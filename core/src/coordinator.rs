// escrow-core/src/coordinator.rs

//! The public entry point. [`Coordinator`] owns the registered pipelines and exposes
//! one method per operation; each builds its context, runs the pipeline registered
//! for it and hands back what the run produced.

use crate::availability::{Availability, AvailabilityChecker, BookingWindow};
use crate::config::BillingPolicy;
use crate::error::{CoreError, CoreResult};
use crate::escrow::{self, EscrowPayment, EscrowPaymentCtx, EscrowPaymentRequest};
use crate::model::{ApprovalDecision, ApprovalRequest, Caller, Order, OrderTimeTracking, ProcessorEvent, TimeEntry, TrackingTotals};
use crate::orders::{self, AcceptOrderCtx, RejectOrderCtx};
use crate::ports::clock::Clock;
use crate::ports::notifier::{Notification, Notifier};
use crate::ports::payments::{ConnectedAccount, PaymentProcessor};
use crate::ports::store::{DocumentStore, StoreExt};
use crate::time_tracking::{self, BillHoursCtx, BillingOutcome, NewTimeEntry};
use crate::webhook::{self, WebhookCtx, WebhookOutcome};
use crate::workflow::{ContextData, PipelineResult, Workflows};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Everything an operation needs from the outside world.
#[derive(Clone)]
pub struct Deps {
  pub store: Arc<dyn DocumentStore>,
  pub payments: Arc<dyn PaymentProcessor>,
  pub notifier: Arc<dyn Notifier>,
  pub clock: Arc<dyn Clock>,
  pub policy: Arc<BillingPolicy>,
}

impl Deps {
  pub fn new(
    store: Arc<dyn DocumentStore>,
    payments: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
  ) -> Self {
    Self {
      store,
      payments,
      notifier,
      clock,
      policy: Arc::new(policy),
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Sends `notification` unless notifications are switched off. Delivery failures
  /// are logged and swallowed.
  pub(crate) async fn notify(&self, notification: Notification) {
    if !self.policy.notifications_enabled {
      debug!(order_id = %notification.order_id(), "Notifications disabled; dropping.");
      return;
    }
    if let Err(e) = self.notifier.notify(&notification).await {
      warn!(
        order_id = %notification.order_id(),
        recipient = %notification.recipient(),
        error = %e,
        "Notification delivery failed."
      );
    }
  }
}

pub struct Coordinator {
  deps: Deps,
  workflows: Workflows<CoreError>,
}

impl Coordinator {
  pub fn new(deps: Deps) -> CoreResult<Self> {
    deps.policy.validate()?;
    let workflows = Workflows::new();
    escrow::register(&workflows);
    orders::register(&workflows);
    time_tracking::register(&workflows);
    webhook::register(&workflows);
    Ok(Self { deps, workflows })
  }

  pub fn deps(&self) -> &Deps {
    &self.deps
  }

  fn availability(&self) -> AvailabilityChecker {
    AvailabilityChecker::new(self.deps.store.clone(), self.deps.policy.daily_hour_cap)
  }

  /// Runs the pipeline for `data` and returns the context once the run completed.
  async fn run<T: Send + Sync + 'static>(&self, data: T) -> CoreResult<(PipelineResult, ContextData<T>)> {
    let ctx = ContextData::new(data);
    let result = self.workflows.run(ctx.clone()).await?;
    Ok((result, ctx))
  }

  #[instrument(name = "Coordinator::create_escrow_payment", skip_all, fields(caller = %caller, draft_id = %request.draft_id), err(Display))]
  pub async fn create_escrow_payment(&self, caller: &Caller, request: EscrowPaymentRequest) -> CoreResult<EscrowPayment> {
    let (_, ctx) = self
      .run(EscrowPaymentCtx::new(self.deps.clone(), caller.clone(), request))
      .await?;
    let payment = ctx.read().payment.clone();
    payment.ok_or_else(|| CoreError::Internal("Escrow payment pipeline produced no intent.".to_string()))
  }

  #[instrument(name = "Coordinator::accept_order", skip(self), fields(caller = %caller), err(Display))]
  pub async fn accept_order(&self, caller: &Caller, order_id: &str) -> CoreResult<Order> {
    let (_, ctx) = self
      .run(AcceptOrderCtx::new(self.deps.clone(), caller.clone(), order_id))
      .await?;
    let order = ctx.read().order.clone();
    order.ok_or_else(|| CoreError::Internal("Accept pipeline produced no order.".to_string()))
  }

  #[instrument(name = "Coordinator::reject_order", skip(self, reason), fields(caller = %caller), err(Display))]
  pub async fn reject_order(&self, caller: &Caller, order_id: &str, reason: &str) -> CoreResult<Order> {
    let (_, ctx) = self
      .run(RejectOrderCtx::new(self.deps.clone(), caller.clone(), order_id, reason))
      .await?;
    let order = ctx.read().order.clone();
    order.ok_or_else(|| CoreError::Internal("Reject pipeline produced no order.".to_string()))
  }

  pub async fn start_work(&self, caller: &Caller, order_id: &str) -> CoreResult<Order> {
    orders::start_work(&self.deps, caller, order_id).await
  }

  pub async fn complete_order(&self, caller: &Caller, order_id: &str) -> CoreResult<Order> {
    orders::complete_order(&self.deps, caller, order_id).await
  }

  /// The order as stored, visible to its customer and provider only.
  pub async fn get_order(&self, caller: &Caller, order_id: &str) -> CoreResult<Order> {
    let order = self
      .deps
      .store
      .fetch::<Order>(order_id)
      .await?
      .ok_or_else(|| CoreError::NotFound(format!("Order {order_id} does not exist.")))?;
    if !order.is_party(caller.id()) {
      return Err(CoreError::PermissionDenied(
        "Only the parties of an order can view it.".to_string(),
      ));
    }
    Ok(order)
  }

  pub async fn initialize_time_tracking(
    &self,
    caller: &Caller,
    order_id: &str,
    planned_hours: f64,
    hourly_rate_cents: i64,
  ) -> CoreResult<OrderTimeTracking> {
    time_tracking::initialize(&self.deps, caller, order_id, planned_hours, hourly_rate_cents).await
  }

  pub async fn log_time_entry(&self, caller: &Caller, order_id: &str, entry: NewTimeEntry) -> CoreResult<TimeEntry> {
    time_tracking::log_entry(&self.deps, caller, order_id, entry).await
  }

  pub async fn submit_for_customer_approval(
    &self,
    caller: &Caller,
    order_id: &str,
    entry_ids: &[String],
    provider_message: Option<String>,
  ) -> CoreResult<ApprovalRequest> {
    time_tracking::submit_for_approval(&self.deps, caller, order_id, entry_ids, provider_message).await
  }

  pub async fn process_customer_approval(
    &self,
    caller: &Caller,
    approval_request_id: &str,
    decision: ApprovalDecision,
    approved_entry_ids: Option<Vec<String>>,
    customer_feedback: Option<String>,
  ) -> CoreResult<ApprovalRequest> {
    time_tracking::process_approval(
      &self.deps,
      caller,
      approval_request_id,
      decision,
      approved_entry_ids,
      customer_feedback,
    )
    .await
  }

  #[instrument(name = "Coordinator::bill_approved_additional_hours", skip(self, entry_ids), fields(caller = %caller), err(Display))]
  pub async fn bill_approved_additional_hours(
    &self,
    caller: &Caller,
    order_id: &str,
    entry_ids: Vec<String>,
  ) -> CoreResult<BillingOutcome> {
    let (_, ctx) = self
      .run(BillHoursCtx::new(self.deps.clone(), caller.clone(), order_id, entry_ids))
      .await?;
    let outcome = ctx.read().outcome.clone();
    outcome.ok_or_else(|| CoreError::Internal("Billing pipeline produced no outcome.".to_string()))
  }

  pub async fn recompute_time_tracking(&self, order_id: &str) -> CoreResult<TrackingTotals> {
    time_tracking::recompute_aggregate(&self.deps, order_id).await
  }

  /// Applies one verified processor event. Replays of an already consumed event
  /// report [`WebhookOutcome::Duplicate`].
  #[instrument(name = "Coordinator::consume_webhook", skip_all, fields(event_id = %event.id, event_type = %event.event_type), err(Display))]
  pub async fn consume_webhook(&self, event: ProcessorEvent) -> CoreResult<WebhookOutcome> {
    let (result, ctx) = self.run(WebhookCtx::new(self.deps.clone(), event)).await?;
    let outcome = ctx.read().outcome.clone();
    match (result, outcome) {
      (_, Some(outcome)) => Ok(outcome),
      (PipelineResult::Stopped, None) => Err(CoreError::Internal("Webhook pipeline stopped without an outcome.".to_string())),
      (PipelineResult::Completed, None) => Err(CoreError::Internal("Webhook pipeline produced no outcome.".to_string())),
    }
  }

  pub async fn check_availability(&self, provider_id: &str, candidate: &BookingWindow) -> CoreResult<Availability> {
    self.availability().check_provider(provider_id, candidate).await
  }

  pub async fn available_providers(&self, provider_ids: &[String], candidate: &BookingWindow) -> Vec<String> {
    self.availability().available_providers(provider_ids, candidate).await
  }

  pub async fn onboard_provider(&self, caller: &Caller, email: &str, country: &str) -> CoreResult<ConnectedAccount> {
    escrow::onboard_provider(&self.deps, caller, email, country).await
  }

  pub async fn payout_status(&self, caller: &Caller) -> CoreResult<ConnectedAccount> {
    escrow::payout_status(&self.deps, caller).await
  }
}
