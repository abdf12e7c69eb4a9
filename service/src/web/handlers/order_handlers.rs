// escrow_service/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

#[derive(Deserialize, Debug)]
pub struct RejectOrderPayload {
  pub reason: String,
}

#[instrument(name = "handler::get_order", skip(app_state, auth_user), fields(caller = %auth_user.caller()))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let order = app_state.coordinator.get_order(auth_user.caller(), &order_id).await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::accept_order", skip(app_state, auth_user), fields(caller = %auth_user.caller()))]
pub async fn accept_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let order = app_state.coordinator.accept_order(auth_user.caller(), &order_id).await?;
  info!(order_id = %order.order_id, "Order accepted via API.");
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::reject_order", skip(app_state, auth_user, payload), fields(caller = %auth_user.caller()))]
pub async fn reject_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
  payload: web::Json<RejectOrderPayload>,
) -> Result<HttpResponse, AppError> {
  let order = app_state
    .coordinator
    .reject_order(auth_user.caller(), &order_id, &payload.reason)
    .await?;
  info!(order_id = %order.order_id, refund_id = ?order.refund_id, "Order rejected via API.");
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::start_work", skip(app_state, auth_user), fields(caller = %auth_user.caller()))]
pub async fn start_work_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let order = app_state.coordinator.start_work(auth_user.caller(), &order_id).await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::complete_order", skip(app_state, auth_user), fields(caller = %auth_user.caller()))]
pub async fn complete_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let order = app_state.coordinator.complete_order(auth_user.caller(), &order_id).await?;
  Ok(HttpResponse::Ok().json(order))
}
