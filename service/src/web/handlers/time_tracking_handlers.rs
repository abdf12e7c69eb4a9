// escrow_service/src/web/handlers/time_tracking_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use escrow_core::model::{ApprovalDecision, EntryCategory};
use escrow_core::NewTimeEntry;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitializePayload {
  pub planned_hours: f64,
  pub hourly_rate_cents: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryPayload {
  pub category: EntryCategory,
  pub hours: f64,
  #[serde(default)]
  pub description: String,
  pub work_date: Option<NaiveDate>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
  pub entry_ids: Vec<String>,
  pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPayload {
  pub decision: ApprovalDecision,
  pub approved_entry_ids: Option<Vec<String>>,
  pub feedback: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BillingPayload {
  pub entry_ids: Vec<String>,
}

#[instrument(name = "handler::initialize_time_tracking", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller()))]
pub async fn initialize_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
  payload: web::Json<InitializePayload>,
) -> Result<HttpResponse, AppError> {
  let tracking = app_state
    .coordinator
    .initialize_time_tracking(auth_user.caller(), &order_id, payload.planned_hours, payload.hourly_rate_cents)
    .await?;
  Ok(HttpResponse::Created().json(tracking))
}

#[instrument(name = "handler::log_time_entry", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller(), hours = payload.hours))]
pub async fn log_entry_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
  payload: web::Json<TimeEntryPayload>,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let entry = app_state
    .coordinator
    .log_time_entry(
      auth_user.caller(),
      &order_id,
      NewTimeEntry {
        category: payload.category,
        hours: payload.hours,
        description: payload.description,
        work_date: payload.work_date,
      },
    )
    .await?;
  Ok(HttpResponse::Created().json(entry))
}

#[instrument(name = "handler::submit_for_approval", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller(), entries = payload.entry_ids.len()))]
pub async fn submit_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
  payload: web::Json<SubmitPayload>,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let request = app_state
    .coordinator
    .submit_for_customer_approval(auth_user.caller(), &order_id, &payload.entry_ids, payload.message)
    .await?;
  info!(approval_request_id = %request.request_id, "Hours submitted via API.");
  Ok(HttpResponse::Created().json(request))
}

#[instrument(name = "handler::process_approval", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller(), decision = payload.decision.as_str()))]
pub async fn decision_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  request_id: web::Path<String>,
  payload: web::Json<DecisionPayload>,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let request = app_state
    .coordinator
    .process_customer_approval(
      auth_user.caller(),
      &request_id,
      payload.decision,
      payload.approved_entry_ids,
      payload.feedback,
    )
    .await?;
  Ok(HttpResponse::Ok().json(request))
}

#[instrument(name = "handler::bill_additional_hours", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller()))]
pub async fn billing_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
  payload: web::Json<BillingPayload>,
) -> Result<HttpResponse, AppError> {
  let outcome = app_state
    .coordinator
    .bill_approved_additional_hours(auth_user.caller(), &order_id, payload.into_inner().entry_ids)
    .await?;
  Ok(HttpResponse::Created().json(outcome))
}

/// Repairs the tracking totals; open to either party of the order.
#[instrument(name = "handler::recompute_time_tracking", skip(app_state, auth_user), fields(caller = %auth_user.caller()))]
pub async fn recompute_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  app_state.coordinator.get_order(auth_user.caller(), &order_id).await?;
  let totals = app_state.coordinator.recompute_time_tracking(&order_id).await?;
  Ok(HttpResponse::Ok().json(totals))
}
