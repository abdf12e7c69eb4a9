// escrow-core/src/time_tracking.rs

//! Additional-hours workflow on active orders.
//!
//! Entries move `logged → submitted → customer_approved | customer_rejected → billed`;
//! only approved additional entries are ever billed. Every entry change rewrites the
//! tracking totals in the same transaction.

use crate::coordinator::Deps;
use crate::error::{CoreError, CoreResult};
use crate::escrow::{self, EscrowIntentRequest, EscrowPayment, EscrowPurpose};
use crate::model::{
  ApprovalDecision, ApprovalRequest, ApprovalStatus, Caller, EntryCategory, EntryStatus, Order, OrderStatus,
  OrderTimeTracking, TimeEntry, TrackingStatus, TrackingTotals,
};
use crate::orders::load_order;
use crate::ports::notifier::Notification;
use crate::ports::store::{run_transaction, Collection, Query, StoreExt, Transaction, TransactionExt};
use crate::workflow::{ContextData, Pipeline, PipelineControl, Workflows};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Upper bound for a single entry.
const MAX_ENTRY_HOURS: f64 = 24.0;

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimeEntry {
  pub category: EntryCategory,
  pub hours: f64,
  pub description: String,
  pub work_date: Option<NaiveDate>,
}

fn entries_query(order_id: &str) -> Query {
  Query::new(Collection::TimeEntries).where_eq("orderId", order_id)
}

/// Queries do not see buffered writes, so entries changed in the running transaction
/// are laid over the stored ones before totals are derived.
fn merge_entries(stored: Vec<TimeEntry>, changed: &[TimeEntry]) -> Vec<TimeEntry> {
  let mut by_id: BTreeMap<String, TimeEntry> = stored.into_iter().map(|e| (e.entry_id.clone(), e)).collect();
  for entry in changed {
    by_id.insert(entry.entry_id.clone(), entry.clone());
  }
  by_id.into_values().collect()
}

async fn load_tracking(tx: &mut dyn Transaction, order_id: &str) -> CoreResult<OrderTimeTracking> {
  tx.load::<OrderTimeTracking>(order_id)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("Time tracking for order {order_id} has not been initialized.")))
}

async fn refresh_totals(
  tx: &mut dyn Transaction,
  tracking: &mut OrderTimeTracking,
  changed: &[TimeEntry],
  now: DateTime<Utc>,
) -> CoreResult<TrackingTotals> {
  let stored: Vec<TimeEntry> = tx.load_where(entries_query(&tracking.order_id)).await?;
  let totals = TrackingTotals::from_entries(&merge_entries(stored, changed));
  tracking.apply_totals(&totals, now);
  Ok(totals)
}

fn require_tracking_provider(tracking: &OrderTimeTracking, caller: &Caller) -> CoreResult<()> {
  if caller.is(&tracking.provider_id) {
    Ok(())
  } else {
    Err(CoreError::PermissionDenied(format!(
      "Only the provider of order {} can manage its hours.",
      tracking.order_id
    )))
  }
}

fn is_fulfilling(order: &Order) -> bool {
  matches!(order.status, OrderStatus::Active | OrderStatus::InProgress)
}

#[instrument(name = "time_tracking::initialize", skip(deps), fields(caller = %caller), err(Display))]
pub async fn initialize(
  deps: &Deps,
  caller: &Caller,
  order_id: &str,
  planned_hours: f64,
  hourly_rate_cents: i64,
) -> CoreResult<OrderTimeTracking> {
  if !planned_hours.is_finite() || planned_hours < 0.0 {
    return Err(CoreError::InvalidArgument("Planned hours must be zero or more.".to_string()));
  }
  if hourly_rate_cents <= 0 {
    return Err(CoreError::InvalidArgument("Hourly rate must be positive.".to_string()));
  }

  let tracking = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps.now();
    let mut tx = deps.store.begin().await?;
    let order = load_order(&mut *tx, order_id).await?;
    if !caller.is(&order.provider_id) {
      return Err(CoreError::PermissionDenied(
        "Only the provider of an order can start time tracking.".to_string(),
      ));
    }
    if !is_fulfilling(&order) {
      return Err(CoreError::FailedPrecondition(format!(
        "Order {order_id} is '{}'; time can only be tracked on active orders.",
        order.status
      )));
    }
    if tx.load::<OrderTimeTracking>(order_id).await?.is_some() {
      return Err(CoreError::AlreadyExists(format!(
        "Time tracking for order {order_id} already exists."
      )));
    }

    let tracking = OrderTimeTracking {
      order_id: order.order_id.clone(),
      customer_id: order.customer_id.clone(),
      provider_id: order.provider_id.clone(),
      planned_hours,
      hourly_rate_cents,
      total_logged_hours: 0.0,
      total_approved_hours: 0.0,
      total_billed_hours: 0.0,
      total_billed_cents: 0,
      status: TrackingStatus::Active,
      created_at: now,
      updated_at: now,
    };
    tx.save(&tracking)?;
    tx.commit().await?;
    Ok(tracking)
  })
  .await?;

  info!("Time tracking initialized.");
  Ok(tracking)
}

#[instrument(name = "time_tracking::log_entry", skip(deps, entry), fields(caller = %caller, hours = entry.hours), err(Display))]
pub async fn log_entry(deps: &Deps, caller: &Caller, order_id: &str, entry: NewTimeEntry) -> CoreResult<TimeEntry> {
  if !entry.hours.is_finite() || entry.hours <= 0.0 || entry.hours > MAX_ENTRY_HOURS {
    return Err(CoreError::InvalidArgument(format!(
      "Hours must be greater than 0 and at most {MAX_ENTRY_HOURS}."
    )));
  }
  let entry = &entry;

  let logged = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps.now();
    let mut tx = deps.store.begin().await?;
    let mut tracking = load_tracking(&mut *tx, order_id).await?;
    require_tracking_provider(&tracking, caller)?;

    let billable_amount_in_cents = match entry.category {
      EntryCategory::Additional => Some((entry.hours * tracking.hourly_rate_cents as f64).round() as i64),
      EntryCategory::Original => None,
    };
    let logged = TimeEntry {
      entry_id: Uuid::new_v4().to_string(),
      order_id: tracking.order_id.clone(),
      provider_id: tracking.provider_id.clone(),
      customer_id: tracking.customer_id.clone(),
      category: entry.category,
      hours: entry.hours,
      description: entry.description.trim().to_string(),
      work_date: entry.work_date,
      billable_amount_in_cents,
      status: EntryStatus::Logged,
      approval_request_id: None,
      payment_intent_id: None,
      created_at: now,
      updated_at: now,
    };

    if tracking.status == TrackingStatus::Completed {
      debug!("Reopening completed time tracking for a new entry.");
      tracking.status = TrackingStatus::Active;
    }
    refresh_totals(&mut *tx, &mut tracking, std::slice::from_ref(&logged), now).await?;
    tx.save(&logged)?;
    tx.save(&tracking)?;
    tx.commit().await?;
    Ok(logged)
  })
  .await?;

  info!(entry_id = %logged.entry_id, "Time entry logged.");
  Ok(logged)
}

fn require_unique(ids: &[String]) -> CoreResult<()> {
  let mut seen = HashSet::with_capacity(ids.len());
  if let Some(dup) = ids.iter().find(|id| !seen.insert(id.as_str())) {
    return Err(CoreError::InvalidArgument(format!("Entry {dup} is listed twice.")));
  }
  Ok(())
}

#[instrument(name = "time_tracking::submit_for_approval", skip(deps, provider_message), fields(caller = %caller), err(Display))]
pub async fn submit_for_approval(
  deps: &Deps,
  caller: &Caller,
  order_id: &str,
  entry_ids: &[String],
  provider_message: Option<String>,
) -> CoreResult<ApprovalRequest> {
  if entry_ids.is_empty() {
    return Err(CoreError::InvalidArgument("At least one time entry must be submitted.".to_string()));
  }
  require_unique(entry_ids)?;
  let provider_message = provider_message.as_deref().map(str::trim).filter(|m| !m.is_empty());

  let request = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps.now();
    let mut tx = deps.store.begin().await?;
    let mut tracking = load_tracking(&mut *tx, order_id).await?;
    require_tracking_provider(&tracking, caller)?;

    let request_id = Uuid::new_v4().to_string();
    let mut changed = Vec::with_capacity(entry_ids.len());
    for entry_id in entry_ids {
      let mut entry = tx
        .load::<TimeEntry>(entry_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Time entry {entry_id} does not exist.")))?;
      if entry.order_id != order_id || !caller.is(&entry.provider_id) {
        return Err(CoreError::PermissionDenied(format!(
          "Time entry {entry_id} is not one of your entries on order {order_id}."
        )));
      }
      if entry.status != EntryStatus::Logged {
        return Err(CoreError::FailedPrecondition(format!(
          "Time entry {entry_id} was already submitted."
        )));
      }
      entry.status = EntryStatus::Submitted;
      entry.approval_request_id = Some(request_id.clone());
      entry.updated_at = now;
      changed.push(entry);
    }

    let request = ApprovalRequest {
      request_id,
      order_id: tracking.order_id.clone(),
      provider_id: tracking.provider_id.clone(),
      customer_id: tracking.customer_id.clone(),
      time_entry_ids: entry_ids.to_vec(),
      total_hours: changed.iter().map(|e| e.hours).sum(),
      total_amount_in_cents: changed.iter().filter_map(|e| e.billable_amount_in_cents).sum(),
      status: ApprovalStatus::Pending,
      provider_message: provider_message.map(str::to_string),
      customer_feedback: None,
      submitted_at: now,
      responded_at: None,
    };

    tracking.status = TrackingStatus::SubmittedForApproval;
    refresh_totals(&mut *tx, &mut tracking, &changed, now).await?;
    for entry in &changed {
      tx.save(entry)?;
    }
    tx.save(&request)?;
    tx.save(&tracking)?;
    tx.commit().await?;
    Ok(request)
  })
  .await?;

  info!(approval_request_id = %request.request_id, total_hours = request.total_hours, "Hours submitted for approval.");
  deps
    .notify(Notification::HoursSubmitted {
      order_id: request.order_id.clone(),
      customer_id: request.customer_id.clone(),
      approval_request_id: request.request_id.clone(),
      total_hours: request.total_hours,
    })
    .await;
  Ok(request)
}

/// Entry ids the customer approves under `decision`.
fn approved_subset<'a>(
  request: &'a ApprovalRequest,
  decision: ApprovalDecision,
  approved_entry_ids: Option<&'a [String]>,
) -> CoreResult<HashSet<&'a str>> {
  match decision {
    ApprovalDecision::Approved => Ok(request.time_entry_ids.iter().map(String::as_str).collect()),
    ApprovalDecision::Rejected => Ok(HashSet::new()),
    ApprovalDecision::PartiallyApproved => {
      let ids = approved_entry_ids.filter(|ids| !ids.is_empty()).ok_or_else(|| {
        CoreError::InvalidArgument("A partial approval must name the approved entries.".to_string())
      })?;
      let mut subset = HashSet::with_capacity(ids.len());
      for id in ids {
        if !request.time_entry_ids.contains(id) {
          return Err(CoreError::InvalidArgument(format!(
            "Entry {id} is not part of approval request {}.",
            request.request_id
          )));
        }
        subset.insert(id.as_str());
      }
      Ok(subset)
    }
  }
}

#[instrument(
  name = "time_tracking::process_approval",
  skip(deps, approved_entry_ids, customer_feedback),
  fields(caller = %caller, decision = decision.as_str()),
  err(Display)
)]
pub async fn process_approval(
  deps: &Deps,
  caller: &Caller,
  approval_request_id: &str,
  decision: ApprovalDecision,
  approved_entry_ids: Option<Vec<String>>,
  customer_feedback: Option<String>,
) -> CoreResult<ApprovalRequest> {
  let approved_entry_ids = approved_entry_ids.as_deref();
  let customer_feedback = customer_feedback.as_deref().map(str::trim).filter(|f| !f.is_empty());

  let request = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps.now();
    let mut tx = deps.store.begin().await?;
    let mut request = tx
      .load::<ApprovalRequest>(approval_request_id)
      .await?
      .ok_or_else(|| CoreError::NotFound(format!("Approval request {approval_request_id} does not exist.")))?;
    if !caller.is(&request.customer_id) {
      return Err(CoreError::PermissionDenied(
        "Only the customer of the order can answer an approval request.".to_string(),
      ));
    }
    if request.status != ApprovalStatus::Pending {
      return Err(CoreError::FailedPrecondition(format!(
        "Approval request {approval_request_id} was already answered."
      )));
    }

    let approved = approved_subset(&request, decision, approved_entry_ids)?;
    let mut changed = Vec::with_capacity(request.time_entry_ids.len());
    for entry_id in &request.time_entry_ids {
      let mut entry = tx
        .load::<TimeEntry>(entry_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Time entry {entry_id} does not exist.")))?;
      if entry.status != EntryStatus::Submitted {
        return Err(CoreError::FailedPrecondition(format!(
          "Time entry {entry_id} is not awaiting approval."
        )));
      }
      entry.status = if approved.contains(entry_id.as_str()) {
        EntryStatus::CustomerApproved
      } else {
        EntryStatus::CustomerRejected
      };
      entry.updated_at = now;
      changed.push(entry);
    }

    let (request_status, tracking_status) = match decision {
      ApprovalDecision::Approved => (ApprovalStatus::Approved, TrackingStatus::FullyApproved),
      ApprovalDecision::Rejected => (ApprovalStatus::Rejected, TrackingStatus::Active),
      ApprovalDecision::PartiallyApproved => (ApprovalStatus::PartiallyApproved, TrackingStatus::PartiallyApproved),
    };
    request.status = request_status;
    request.customer_feedback = customer_feedback.map(str::to_string);
    request.responded_at = Some(now);

    let mut tracking = load_tracking(&mut *tx, &request.order_id).await?;
    tracking.status = tracking_status;
    refresh_totals(&mut *tx, &mut tracking, &changed, now).await?;
    for entry in &changed {
      tx.save(entry)?;
    }
    tx.save(&request)?;
    tx.save(&tracking)?;
    tx.commit().await?;
    Ok(request)
  })
  .await?;

  info!(approval_request_id, "Approval request answered.");
  deps
    .notify(Notification::ApprovalDecided {
      order_id: request.order_id.clone(),
      provider_id: request.provider_id.clone(),
      approval_request_id: request.request_id.clone(),
      decision: decision.as_str().to_string(),
    })
    .await;
  Ok(request)
}

/// Re-derives the tracking totals from every entry of the order. Writes only when the
/// stored totals differ, so repeated runs leave the aggregate untouched.
#[instrument(name = "time_tracking::recompute_aggregate", skip(deps), err(Display))]
pub async fn recompute_aggregate(deps: &Deps, order_id: &str) -> CoreResult<TrackingTotals> {
  run_transaction(deps.policy.transaction_attempts, || async move {
    let mut tx = deps.store.begin().await?;
    let mut tracking = load_tracking(&mut *tx, order_id).await?;
    let entries: Vec<TimeEntry> = tx.load_where(entries_query(order_id)).await?;
    let totals = TrackingTotals::from_entries(&entries);
    if tracking.totals() == totals {
      debug!("Tracking totals already up to date.");
      return Ok(totals);
    }
    tracking.apply_totals(&totals, deps.now());
    tx.save(&tracking)?;
    tx.commit().await?;
    info!(?totals, "Tracking totals repaired.");
    Ok(totals)
  })
  .await
}

/// Result of billing approved additional hours.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingOutcome {
  pub payment_intent_id: String,
  pub client_secret: String,
  pub amount_in_cents: i64,
  pub application_fee_in_cents: i64,
  pub billed_entry_ids: Vec<String>,
  pub billed_hours: f64,
}

pub struct BillHoursCtx {
  pub deps: Deps,
  pub caller: Caller,
  pub order_id: String,
  pub entry_ids: Vec<String>,
  pub tracking: Option<OrderTimeTracking>,
  pub billable: Vec<TimeEntry>,
  pub payment: Option<EscrowPayment>,
  pub outcome: Option<BillingOutcome>,
}

impl BillHoursCtx {
  pub fn new(deps: Deps, caller: Caller, order_id: &str, entry_ids: Vec<String>) -> Self {
    Self {
      deps,
      caller,
      order_id: order_id.to_string(),
      entry_ids,
      tracking: None,
      billable: Vec::new(),
      payment: None,
      outcome: None,
    }
  }
}

pub(crate) fn register(workflows: &Workflows<CoreError>) {
  let mut p = Pipeline::<BillHoursCtx, CoreError>::new(&[
    ("collect_billable_entries", false, None),
    ("create_billing_intent", false, None),
    ("mark_entries_billed", false, None),
    ("notify_customer", true, None),
  ]);

  p.on_step("collect_billable_entries", collect_billable_entries);

  p.on_step("create_billing_intent", |ctx: ContextData<BillHoursCtx>| {
    Box::pin(async move {
      let (deps, intent_request) = {
        let guard = ctx.read();
        let tracking = guard
          .tracking
          .as_ref()
          .ok_or_else(|| CoreError::Internal("Billing reached intent creation without tracking.".to_string()))?;
        (
          guard.deps.clone(),
          EscrowIntentRequest {
            customer_id: tracking.customer_id.clone(),
            provider_id: tracking.provider_id.clone(),
            amount_in_cents: guard.billable.iter().filter_map(|e| e.billable_amount_in_cents).sum(),
            purpose: EscrowPurpose::AdditionalHours {
              order_id: tracking.order_id.clone(),
              time_entry_ids: guard.billable.iter().map(|e| e.entry_id.clone()).collect(),
            },
            extra_metadata: BTreeMap::new(),
          },
        )
      };
      let payment = escrow::create_escrow_intent(&deps, &intent_request).await?;
      ctx.write().payment = Some(payment);
      Ok::<_, CoreError>(PipelineControl::Continue)
    })
  });

  p.on_step("mark_entries_billed", mark_entries_billed);

  p.on_step("notify_customer", |ctx: ContextData<BillHoursCtx>| {
    Box::pin(async move {
      let (deps, notification) = {
        let guard = ctx.read();
        let notification = guard
          .tracking
          .as_ref()
          .zip(guard.outcome.as_ref())
          .map(|(tracking, outcome)| Notification::HoursBilled {
            order_id: tracking.order_id.clone(),
            customer_id: tracking.customer_id.clone(),
            amount_in_cents: outcome.amount_in_cents,
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

async fn collect_billable_entries(ctx: ContextData<BillHoursCtx>) -> CoreResult<PipelineControl> {
  let (deps, caller, order_id, entry_ids) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.caller.clone(), guard.order_id.clone(), guard.entry_ids.clone())
  };
  if entry_ids.is_empty() {
    return Err(CoreError::InvalidArgument("No time entries were given for billing.".to_string()));
  }
  require_unique(&entry_ids)?;

  let tracking = deps
    .store
    .fetch::<OrderTimeTracking>(&order_id)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("Time tracking for order {order_id} has not been initialized.")))?;
  require_tracking_provider(&tracking, &caller)?;

  let mut billable = Vec::with_capacity(entry_ids.len());
  for entry_id in &entry_ids {
    let entry = deps
      .store
      .fetch::<TimeEntry>(entry_id)
      .await?
      .ok_or_else(|| CoreError::NotFound(format!("Time entry {entry_id} does not exist.")))?;
    if entry.order_id != order_id {
      return Err(CoreError::InvalidArgument(format!(
        "Time entry {entry_id} does not belong to order {order_id}."
      )));
    }
    if entry.is_billable() {
      billable.push(entry);
    } else {
      debug!(%entry_id, status = ?entry.status, category = ?entry.category, "Skipping entry that is not billable.");
    }
  }

  let amount: i64 = billable.iter().filter_map(|e| e.billable_amount_in_cents).sum();
  if amount <= 0 {
    return Err(CoreError::FailedPrecondition(
      "There are no approved additional hours to bill.".to_string(),
    ));
  }

  let mut guard = ctx.write();
  guard.tracking = Some(tracking);
  guard.billable = billable;
  Ok(PipelineControl::Continue)
}

async fn mark_entries_billed(ctx: ContextData<BillHoursCtx>) -> CoreResult<PipelineControl> {
  let (deps, order_id, billable_ids, payment) = {
    let guard = ctx.read();
    (
      guard.deps.clone(),
      guard.order_id.clone(),
      guard.billable.iter().map(|e| e.entry_id.clone()).collect::<Vec<_>>(),
      guard.payment.clone(),
    )
  };
  let payment =
    payment.ok_or_else(|| CoreError::Internal("Billing reached commit without a payment intent.".to_string()))?;
  let (deps_ref, order_id_ref, ids_ref, pi_ref) =
    (&deps, order_id.as_str(), billable_ids.as_slice(), payment.payment_intent_id.as_str());

  let committed = run_transaction(deps.policy.transaction_attempts, || async move {
    let now = deps_ref.now();
    let mut tx = deps_ref.store.begin().await?;
    let mut tracking = load_tracking(&mut *tx, order_id_ref).await?;

    let mut changed = Vec::with_capacity(ids_ref.len());
    let mut already_billed = Vec::new();
    for entry_id in ids_ref {
      let mut entry = tx
        .load::<TimeEntry>(entry_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Time entry {entry_id} does not exist.")))?;
      // A concurrent run of the same batch got the replayed intent and committed first.
      if entry.status == EntryStatus::Billed && entry.payment_intent_id.as_deref() == Some(pi_ref) {
        already_billed.push(entry);
        continue;
      }
      if !entry.is_billable() {
        return Err(CoreError::FailedPrecondition(format!(
          "Time entry {entry_id} changed while it was being billed."
        )));
      }
      entry.status = EntryStatus::Billed;
      entry.payment_intent_id = Some(pi_ref.to_string());
      entry.updated_at = now;
      changed.push(entry);
    }
    if changed.is_empty() {
      return Ok((tracking, already_billed));
    }

    tracking.status = TrackingStatus::Completed;
    refresh_totals(&mut *tx, &mut tracking, &changed, now).await?;
    for entry in &changed {
      tx.save(entry)?;
    }
    tx.save(&tracking)?;
    tx.commit().await?;
    changed.extend(already_billed);
    Ok((tracking, changed))
  })
  .await;

  let (tracking, billed) = committed.map_err(|e| {
    error!(%order_id, payment_intent_id = %payment.payment_intent_id, error = %e, "Intent created but entries were not marked billed.");
    e
  })?;

  let outcome = BillingOutcome {
    payment_intent_id: payment.payment_intent_id.clone(),
    client_secret: payment.client_secret.clone(),
    amount_in_cents: payment.amount_in_cents,
    application_fee_in_cents: payment.application_fee_in_cents,
    billed_entry_ids: billed.iter().map(|e| e.entry_id.clone()).collect(),
    billed_hours: billed.iter().map(|e| e.hours).sum(),
  };
  info!(%order_id, amount = outcome.amount_in_cents, entries = billed.len(), "Additional hours billed.");

  let mut guard = ctx.write();
  guard.tracking = Some(tracking);
  guard.outcome = Some(outcome);
  Ok(PipelineControl::Continue)
}
