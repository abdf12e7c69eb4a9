// escrow_service/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use escrow_core::webhook::verified_event;
use tracing::{info, instrument, warn};

use crate::errors::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verifies the processor's signature and forwards the event to the coordinator.
/// Duplicates and ignored events are acknowledged with 200 so the processor stops
/// redelivering them.
#[instrument(name = "handler::payment_webhook", skip(app_state, req, body), fields(payload_size = body.len()))]
pub async fn payment_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let signature = req
    .headers()
    .get(SIGNATURE_HEADER)
    .and_then(|value| value.to_str().ok())
    .ok_or_else(|| {
      warn!("Webhook without signature header.");
      AppError::invalid("Missing signature header.")
    })?;

  let now = app_state.coordinator.deps().now();
  let event = verified_event(&body, signature, &app_state.config.stripe_webhook_secret, now)?;
  let event_id = event.id.clone();

  let outcome = app_state.coordinator.consume_webhook(event).await?;
  info!(%event_id, outcome = %outcome.label(), "Webhook event consumed.");
  Ok(HttpResponse::Ok().json(outcome))
}
