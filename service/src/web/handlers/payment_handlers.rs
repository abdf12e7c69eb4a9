// escrow_service/src/web/handlers/payment_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use escrow_core::model::BookingKind;
use escrow_core::{Availability, BookingWindow, EscrowPaymentRequest};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

// --- Request DTOs ---
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EscrowPaymentPayload {
  pub draft_id: String,
  pub provider_id: String,
  pub amount_in_cents: i64,
  #[serde(default)]
  pub metadata: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPayload {
  pub email: String,
  pub country: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WindowPayload {
  pub start_at: Option<DateTime<Utc>>,
  pub end_at: Option<DateTime<Utc>>,
  pub booking_kind: BookingKind,
  pub hours: Option<f64>,
}

impl WindowPayload {
  fn into_window(self) -> Result<BookingWindow, AppError> {
    if self.booking_kind == BookingKind::Hourly && self.hours.filter(|h| *h > 0.0).is_none() {
      return Err(AppError::invalid("Hourly bookings need a positive number of hours."));
    }
    Ok(BookingWindow {
      order_id: String::new(),
      start_at: self.start_at,
      end_at: self.end_at,
      kind: self.booking_kind,
      hours: self.hours,
    })
  }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySearchPayload {
  pub provider_ids: Vec<String>,
  #[serde(flatten)]
  pub window: WindowPayload,
}

// --- Handler Implementations ---

#[instrument(
  name = "handler::create_escrow_payment",
  skip(app_state, auth_user, payload),
  fields(caller = %auth_user.caller(), draft_id = %payload.draft_id)
)]
pub async fn create_escrow_payment_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  payload: web::Json<EscrowPaymentPayload>,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let payment = app_state
    .coordinator
    .create_escrow_payment(
      auth_user.caller(),
      EscrowPaymentRequest {
        draft_id: payload.draft_id,
        provider_id: payload.provider_id,
        amount_in_cents: payload.amount_in_cents,
        metadata: payload.metadata,
      },
    )
    .await?;
  info!(payment_intent_id = %payment.payment_intent_id, "Escrow payment intent created via API.");
  Ok(HttpResponse::Created().json(payment))
}

#[instrument(name = "handler::onboard_provider", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller()))]
pub async fn onboard_provider_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  payload: web::Json<OnboardingPayload>,
) -> Result<HttpResponse, AppError> {
  let account = app_state
    .coordinator
    .onboard_provider(auth_user.caller(), &payload.email, &payload.country)
    .await?;
  Ok(HttpResponse::Ok().json(account))
}

#[instrument(name = "handler::payout_status", skip(app_state, auth_user), fields(caller = %auth_user.caller()))]
pub async fn payout_status_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
  let account = app_state.coordinator.payout_status(auth_user.caller()).await?;
  Ok(HttpResponse::Ok().json(account))
}

#[instrument(name = "handler::check_availability", skip(app_state, _auth_user, payload))]
pub async fn check_availability_handler(
  app_state: web::Data<AppState>,
  _auth_user: AuthenticatedUser,
  provider_id: web::Path<String>,
  payload: web::Json<WindowPayload>,
) -> Result<HttpResponse, AppError> {
  let candidate = payload.into_inner().into_window()?;
  let body = match app_state.coordinator.check_availability(&provider_id, &candidate).await? {
    Availability::Available => json!({ "available": true }),
    Availability::Conflict { order_id, reason } => {
      json!({ "available": false, "conflictingOrderId": order_id, "reason": reason })
    }
  };
  Ok(HttpResponse::Ok().json(body))
}

/// Filters candidate providers down to those free for the requested window.
#[instrument(name = "handler::search_availability", skip(app_state, _auth_user, payload), fields(candidates = payload.provider_ids.len()))]
pub async fn search_availability_handler(
  app_state: web::Data<AppState>,
  _auth_user: AuthenticatedUser,
  payload: web::Json<AvailabilitySearchPayload>,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let candidate = payload.window.into_window()?;
  let available = app_state
    .coordinator
    .available_providers(&payload.provider_ids, &candidate)
    .await;
  Ok(HttpResponse::Ok().json(json!({ "availableProviderIds": available })))
}
