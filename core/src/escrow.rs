// escrow-core/src/escrow.rs

//! Escrow payments: destination-charge intents with the platform fee split off,
//! refunds, and the provider's connected payout account.

use crate::coordinator::Deps;
use crate::error::{CoreError, CoreResult};
use crate::idempotency::IdempotencyLock;
use crate::model::{Caller, Draft, DraftStatus, ProviderProfile};
use crate::ports::payments::{ConnectedAccount, CreateIntentRequest, Refund};
use crate::ports::store::{run_transaction, StoreExt, TransactionExt};
use crate::workflow::{ContextData, Pipeline, PipelineControl, Workflows};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Intent metadata keys read back by the webhook processor.
pub mod metadata {
  pub const KIND: &str = "kind";
  pub const DRAFT_ID: &str = "draftId";
  pub const ORDER_ID: &str = "orderId";
  pub const TIME_ENTRY_IDS: &str = "timeEntryIds";
  pub const CUSTOMER_ID: &str = "customerId";
  pub const PROVIDER_ID: &str = "providerId";

  pub const KIND_BOOKING: &str = "booking";
  pub const KIND_ADDITIONAL_HOURS: &str = "additional_hours";
}

/// Platform share of `amount_in_cents`, rounded half away from zero.
pub fn application_fee(amount_in_cents: i64, fee_rate: f64) -> i64 {
  (amount_in_cents as f64 * fee_rate).round() as i64
}

#[derive(Debug, Clone, PartialEq)]
pub enum EscrowPurpose {
  Booking { draft_id: String },
  AdditionalHours { order_id: String, time_entry_ids: Vec<String> },
}

impl EscrowPurpose {
  fn fee_rate(&self, deps: &Deps) -> f64 {
    match self {
      EscrowPurpose::Booking { .. } => deps.policy.booking_fee_rate,
      EscrowPurpose::AdditionalHours { .. } => deps.policy.additional_hours_fee_rate,
    }
  }

  /// Processor idempotency key. Identifies the thing being paid for, so a retry of the
  /// same draft or entry batch replays its intent while distinct payments never share one.
  pub fn processor_key(&self, amount_in_cents: i64) -> String {
    match self {
      EscrowPurpose::Booking { draft_id } => format!("booking:{draft_id}:{amount_in_cents}"),
      EscrowPurpose::AdditionalHours { order_id, time_entry_ids } => {
        let mut ids: Vec<&str> = time_entry_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        format!("hours:{order_id}:{}:{amount_in_cents}", ids.join(","))
      }
    }
  }

  fn write_metadata(&self, into: &mut BTreeMap<String, String>) {
    match self {
      EscrowPurpose::Booking { draft_id } => {
        into.insert(metadata::KIND.into(), metadata::KIND_BOOKING.into());
        into.insert(metadata::DRAFT_ID.into(), draft_id.clone());
      }
      EscrowPurpose::AdditionalHours { order_id, time_entry_ids } => {
        into.insert(metadata::KIND.into(), metadata::KIND_ADDITIONAL_HOURS.into());
        into.insert(metadata::ORDER_ID.into(), order_id.clone());
        into.insert(metadata::TIME_ENTRY_IDS.into(), time_entry_ids.join(","));
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscrowIntentRequest {
  pub customer_id: String,
  pub provider_id: String,
  pub amount_in_cents: i64,
  pub purpose: EscrowPurpose,
  pub extra_metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowPayment {
  pub payment_intent_id: String,
  pub client_secret: String,
  pub amount_in_cents: i64,
  pub application_fee_in_cents: i64,
  pub destination_account_id: String,
}

/// Creates one escrow payment intent while holding the payment lock for the request
/// fingerprint. The lock is released whatever the outcome.
#[instrument(
  name = "escrow::create_escrow_intent",
  skip_all,
  fields(customer_id = %request.customer_id, provider_id = %request.provider_id, amount = request.amount_in_cents),
  err(Display)
)]
pub async fn create_escrow_intent(deps: &Deps, request: &EscrowIntentRequest) -> CoreResult<EscrowPayment> {
  if request.amount_in_cents <= 0 {
    return Err(CoreError::InvalidArgument("Payment amount must be positive.".to_string()));
  }

  let lock = IdempotencyLock::from_deps(deps);
  let ttl = deps.policy.lock_ttl();
  let key = IdempotencyLock::payment_key(
    &request.customer_id,
    &request.provider_id,
    request.amount_in_cents,
    deps.now(),
    ttl,
  );
  let request_id = Uuid::new_v4().to_string();
  let acquisition = lock.acquire(&key, ttl, &request_id).await?;
  if !acquisition.acquired {
    warn!(owner = %acquisition.owner_request_id, "Duplicate payment request refused.");
    return Err(CoreError::AlreadyExists(
      "A payment for this request is already in progress.".to_string(),
    ));
  }

  let outcome = intent_under_lock(deps, request).await;
  lock.release(&key, &request_id).await;
  outcome
}

async fn intent_under_lock(deps: &Deps, request: &EscrowIntentRequest) -> CoreResult<EscrowPayment> {
  let destination = resolve_destination_account(deps, &request.provider_id).await?;
  let fee = application_fee(request.amount_in_cents, request.purpose.fee_rate(deps));

  let mut intent_metadata = request.extra_metadata.clone();
  request.purpose.write_metadata(&mut intent_metadata);
  intent_metadata.insert(metadata::CUSTOMER_ID.into(), request.customer_id.clone());
  intent_metadata.insert(metadata::PROVIDER_ID.into(), request.provider_id.clone());

  let intent = deps
    .payments
    .create_intent(CreateIntentRequest {
      amount_in_cents: request.amount_in_cents,
      currency: deps.policy.currency.clone(),
      application_fee_in_cents: fee,
      transfer_destination: destination.clone(),
      metadata: intent_metadata,
      idempotency_key: Some(request.purpose.processor_key(request.amount_in_cents)),
    })
    .await?;
  info!(payment_intent_id = %intent.id, application_fee = fee, "Escrow payment intent created.");

  Ok(EscrowPayment {
    payment_intent_id: intent.id,
    client_secret: intent.client_secret,
    amount_in_cents: intent.amount_in_cents,
    application_fee_in_cents: intent.application_fee_in_cents,
    destination_account_id: destination,
  })
}

/// The provider's connected account id, provided it can receive charges.
pub async fn resolve_destination_account(deps: &Deps, provider_id: &str) -> CoreResult<String> {
  let account_id = deps
    .store
    .fetch::<ProviderProfile>(provider_id)
    .await?
    .and_then(|profile| profile.connected_account_id)
    .filter(|id| !id.is_empty())
    .ok_or_else(|| {
      CoreError::FailedPrecondition(format!("Provider {provider_id} has no connected payout account."))
    })?;

  let account = deps.payments.retrieve_account(&account_id).await?;
  if !account.charges_enabled {
    return Err(CoreError::FailedPrecondition(format!(
      "Payout account of provider {provider_id} cannot receive charges yet."
    )));
  }
  Ok(account.id)
}

/// Refunds a captured intent. Any processor failure is returned as is; callers must
/// not proceed with the transition that needed the refund.
#[instrument(name = "escrow::refund_payment", skip(deps), err(Display))]
pub async fn refund_payment(deps: &Deps, payment_intent_id: &str) -> CoreResult<Refund> {
  let refund = deps.payments.refund(payment_intent_id).await.map_err(|e| {
    error!(error = %e, "Refund failed.");
    CoreError::from(e)
  })?;
  info!(refund_id = %refund.id, "Payment refunded.");
  Ok(refund)
}

/// Creates the connected account for the calling provider, or returns the existing one.
#[instrument(name = "escrow::onboard_provider", skip(deps, email), fields(provider_id = %caller), err(Display))]
pub async fn onboard_provider(deps: &Deps, caller: &Caller, email: &str, country: &str) -> CoreResult<ConnectedAccount> {
  if !email.contains('@') {
    return Err(CoreError::InvalidArgument("A valid contact email is required.".to_string()));
  }
  if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
    return Err(CoreError::InvalidArgument(format!(
      "Country '{country}' is not a two-letter code."
    )));
  }

  let existing = deps.store.fetch::<ProviderProfile>(caller.id()).await?;
  if let Some(account_id) = existing.as_ref().and_then(|p| p.connected_account_id.clone()) {
    return Ok(deps.payments.retrieve_account(&account_id).await?);
  }

  let account = deps
    .payments
    .create_connected_account(email, &country.to_ascii_uppercase())
    .await?;
  let new_account_id = account.id.as_str();
  let stored_account_id = run_transaction(deps.policy.transaction_attempts, || async move {
    let mut tx = deps.store.begin().await?;
    let now = deps.now();
    let mut profile = tx.load::<ProviderProfile>(caller.id()).await?.unwrap_or(ProviderProfile {
      provider_id: caller.id().to_string(),
      email: None,
      connected_account_id: None,
      updated_at: now,
    });
    if let Some(winner) = profile.connected_account_id.clone() {
      return Ok(winner);
    }
    profile.connected_account_id = Some(new_account_id.to_string());
    profile.email = Some(email.to_string());
    profile.updated_at = now;
    tx.save(&profile)?;
    tx.commit().await?;
    Ok(new_account_id.to_string())
  })
  .await?;

  if stored_account_id != account.id {
    warn!(orphaned_account = %account.id, kept = %stored_account_id, "Concurrent onboarding; keeping the first account.");
    return Ok(deps.payments.retrieve_account(&stored_account_id).await?);
  }
  info!(account_id = %account.id, "Provider onboarded.");
  Ok(account)
}

pub async fn payout_status(deps: &Deps, caller: &Caller) -> CoreResult<ConnectedAccount> {
  let account_id = deps
    .store
    .fetch::<ProviderProfile>(caller.id())
    .await?
    .and_then(|p| p.connected_account_id)
    .ok_or_else(|| CoreError::FailedPrecondition("No payout account has been set up yet.".to_string()))?;
  Ok(deps.payments.retrieve_account(&account_id).await?)
}

/// Customer request to pay for a draft booking.
#[derive(Debug, Clone, PartialEq)]
pub struct EscrowPaymentRequest {
  pub draft_id: String,
  pub provider_id: String,
  pub amount_in_cents: i64,
  pub metadata: BTreeMap<String, String>,
}

pub struct EscrowPaymentCtx {
  pub deps: Deps,
  pub caller: Caller,
  pub request: EscrowPaymentRequest,
  pub payment: Option<EscrowPayment>,
}

impl EscrowPaymentCtx {
  pub fn new(deps: Deps, caller: Caller, request: EscrowPaymentRequest) -> Self {
    Self {
      deps,
      caller,
      request,
      payment: None,
    }
  }
}

pub(crate) fn register(workflows: &Workflows<CoreError>) {
  let mut p = Pipeline::<EscrowPaymentCtx, CoreError>::new(&[
    ("validate_payment_request", false, None),
    ("create_escrow_intent", false, None),
  ]);

  p.on_step("validate_payment_request", validate_payment_request);

  p.on_step("create_escrow_intent", |ctx: ContextData<EscrowPaymentCtx>| {
    Box::pin(async move {
      let (deps, intent_request) = {
        let guard = ctx.read();
        let request = &guard.request;
        (
          guard.deps.clone(),
          EscrowIntentRequest {
            customer_id: guard.caller.id().to_string(),
            provider_id: request.provider_id.clone(),
            amount_in_cents: request.amount_in_cents,
            purpose: EscrowPurpose::Booking {
              draft_id: request.draft_id.clone(),
            },
            extra_metadata: request.metadata.clone(),
          },
        )
      };
      let payment = create_escrow_intent(&deps, &intent_request).await?;
      ctx.write().payment = Some(payment);
      Ok::<_, CoreError>(PipelineControl::Continue)
    })
  });

  workflows.register(p);
}

async fn validate_payment_request(ctx: ContextData<EscrowPaymentCtx>) -> CoreResult<PipelineControl> {
  let (deps, caller, request) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.caller.clone(), guard.request.clone())
  };

  if request.amount_in_cents <= 0 {
    return Err(CoreError::InvalidArgument("Payment amount must be positive.".to_string()));
  }
  let draft = deps
    .store
    .fetch::<Draft>(&request.draft_id)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("Draft {} does not exist.", request.draft_id)))?;

  if !caller.is(&draft.customer_id) {
    return Err(CoreError::PermissionDenied(
      "Only the customer of a draft can pay for it.".to_string(),
    ));
  }
  if draft.provider_id != request.provider_id {
    return Err(CoreError::InvalidArgument(format!(
      "Draft {} is not a booking with provider {}.",
      draft.draft_id, request.provider_id
    )));
  }
  if draft.status == DraftStatus::Converted {
    return Err(CoreError::FailedPrecondition(format!(
      "Draft {} has already been paid.",
      draft.draft_id
    )));
  }
  if draft.price_in_cents != request.amount_in_cents {
    return Err(CoreError::InvalidArgument(format!(
      "Amount {} does not match the draft price {}.",
      request.amount_in_cents, draft.price_in_cents
    )));
  }
  Ok(PipelineControl::Continue)
}
