// escrow_service/src/web/routes.rs

use actix_web::web;

use crate::web::handlers::{order_handlers, payment_handlers, time_tracking_handlers, webhook_handlers};

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/payments").route(
          "/escrow",
          web::post().to(payment_handlers::create_escrow_payment_handler),
        ),
      )
      .service(
        web::scope("/orders/{order_id}")
          .route("", web::get().to(order_handlers::get_order_handler))
          .route("/accept", web::post().to(order_handlers::accept_order_handler))
          .route("/reject", web::post().to(order_handlers::reject_order_handler))
          .route("/start", web::post().to(order_handlers::start_work_handler))
          .route("/complete", web::post().to(order_handlers::complete_order_handler))
          .route(
            "/time-tracking",
            web::post().to(time_tracking_handlers::initialize_handler),
          )
          .route(
            "/time-tracking/entries",
            web::post().to(time_tracking_handlers::log_entry_handler),
          )
          .route(
            "/time-tracking/approval-requests",
            web::post().to(time_tracking_handlers::submit_handler),
          )
          .route(
            "/time-tracking/billing",
            web::post().to(time_tracking_handlers::billing_handler),
          )
          .route(
            "/time-tracking/recompute",
            web::post().to(time_tracking_handlers::recompute_handler),
          ),
      )
      .route(
        "/approval-requests/{request_id}/decision",
        web::post().to(time_tracking_handlers::decision_handler),
      )
      .service(
        web::scope("/providers/me")
          .route("/onboarding", web::post().to(payment_handlers::onboard_provider_handler))
          .route("/payout-status", web::get().to(payment_handlers::payout_status_handler)),
      )
      .route(
        "/providers/{provider_id}/availability",
        web::post().to(payment_handlers::check_availability_handler),
      )
      .route(
        "/availability/search",
        web::post().to(payment_handlers::search_availability_handler),
      )
      // The processor posts here without a caller token; the signature authenticates it.
      .route(
        "/webhooks/stripe",
        web::post().to(webhook_handlers::payment_webhook_handler),
      ),
  );
}
