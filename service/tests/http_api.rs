// tests/http_api.rs

use actix_web::{http::StatusCode, test, web, App};
use chrono::{DateTime, TimeZone, Utc};
use escrow_core::memory::{InMemoryStore, ManualClock, MockPaymentProcessor, RecordingNotifier};
use escrow_core::model::{BookingKind, Draft, DraftStatus, Order, OrderStatus, ProviderProfile, StatusChange};
use escrow_core::ports::{Clock, Collection};
use escrow_core::webhook::sign;
use escrow_core::{BillingPolicy, Coordinator, Deps};
use escrow_service::config::{AppConfig, LogFormat};
use escrow_service::state::AppState;
use escrow_service::web::configure_app_routes;
use escrow_service::web::extractors::issue_token;
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;

const JWT_SECRET: &str = "test-jwt-secret";
const WEBHOOK_SECRET: &str = "whsec_test";
const CUSTOMER: &str = "customer-1";
const PROVIDER: &str = "provider-1";

fn day(d: u32, hour: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, d, hour, 0, 0).unwrap()
}

fn config() -> AppConfig {
  AppConfig {
    server_host: "127.0.0.1".to_string(),
    server_port: 0,
    database_url: "postgres://unused".to_string(),
    stripe_secret_key: "sk_test".to_string(),
    stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
    stripe_api_base: "http://127.0.0.1:1".to_string(),
    jwt_secret: JWT_SECRET.to_string(),
    notification_sender: "noreply@example.com".to_string(),
    policy: BillingPolicy::default(),
    log_format: LogFormat::Pretty,
    run_migrations: false,
  }
}

struct Fixture {
  store: Arc<InMemoryStore>,
  payments: Arc<MockPaymentProcessor>,
  clock: Arc<ManualClock>,
  state: AppState,
}

fn fixture() -> Fixture {
  let store = Arc::new(InMemoryStore::new());
  let payments = Arc::new(MockPaymentProcessor::new());
  let clock = Arc::new(ManualClock::new(day(1, 8)));
  let deps = Deps::new(
    store.clone(),
    payments.clone(),
    Arc::new(RecordingNotifier::new()),
    clock.clone(),
    BillingPolicy::default(),
  );
  let coordinator = Coordinator::new(deps).unwrap();
  Fixture {
    store,
    payments,
    clock,
    state: AppState::new(coordinator, config()),
  }
}

fn bearer(subject: &str) -> (&'static str, String) {
  let token = issue_token(subject, 4_000_000_000, JWT_SECRET).unwrap();
  ("Authorization", format!("Bearer {token}"))
}

fn seed_draft(store: &InMemoryStore, draft_id: &str, price_in_cents: i64) {
  store
    .insert(&Draft {
      draft_id: draft_id.to_string(),
      customer_id: CUSTOMER.to_string(),
      provider_id: PROVIDER.to_string(),
      category: "gardening".to_string(),
      price_in_cents,
      currency: "eur".to_string(),
      booking_kind: BookingKind::FullDay,
      booked_hours: None,
      start_at: Some(day(10, 9)),
      end_at: Some(day(10, 17)),
      status: DraftStatus::PendingPaymentSetup,
      converted_to_order_id: None,
      last_payment_error: None,
      created_at: day(1, 0),
      updated_at: day(1, 0),
    })
    .unwrap();
}

fn seed_clearing_order(store: &InMemoryStore, order_id: &str) {
  store
    .insert(&Order {
      order_id: order_id.to_string(),
      draft_id: format!("draft-{order_id}"),
      customer_id: CUSTOMER.to_string(),
      provider_id: PROVIDER.to_string(),
      category: "gardening".to_string(),
      booking_kind: BookingKind::FullDay,
      booked_hours: None,
      price_in_cents: 20_000,
      total_paid_in_cents: 20_000,
      currency: "eur".to_string(),
      payment_intent_id: format!("pi_{order_id}"),
      refund_id: None,
      start_at: Some(day(10, 9)),
      end_at: Some(day(10, 17)),
      status: OrderStatus::Clearing,
      created_at: day(1, 0),
      last_updated_at: day(1, 0),
      rejection_reason: None,
      fixed_by_admin: None,
      pending_decision: None,
      status_history: vec![StatusChange {
        from: None,
        to: OrderStatus::Clearing,
        actor: "seed".to_string(),
        at: day(1, 0),
      }],
    })
    .unwrap();
}

fn booking_paid_payload(draft_id: &str) -> Vec<u8> {
  serde_json::to_vec(&json!({
    "id": "evt_1",
    "type": "payment_intent.succeeded",
    "data": { "object": {
      "id": "pi_1",
      "amount": 10_000,
      "amount_received": 10_000,
      "metadata": { "kind": "booking", "draftId": draft_id }
    }}
  }))
  .unwrap()
}

#[actix_web::test]
#[serial]
async fn health_check_responds_ok() {
  let fx = fixture();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/health").to_request()).await;

  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["status"], "ok");
}

#[actix_web::test]
#[serial]
async fn order_routes_require_a_bearer_token() {
  let fx = fixture();
  seed_clearing_order(&fx.store, "o1");
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let resp = test::call_service(
    &app,
    test::TestRequest::post().uri("/api/v1/orders/o1/accept").to_request(),
  )
  .await;

  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["kind"], "unauthenticated");
}

#[actix_web::test]
#[serial]
async fn provider_accepts_and_customer_is_refused() {
  let fx = fixture();
  seed_clearing_order(&fx.store, "o1");
  let store = fx.store.clone();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let by_customer = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/orders/o1/accept")
      .insert_header(bearer(CUSTOMER))
      .to_request(),
  )
  .await;
  assert_eq!(by_customer.status(), StatusCode::FORBIDDEN);
  let body: Value = test::read_body_json(by_customer).await;
  assert_eq!(body["kind"], "permission-denied");

  let by_provider = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/orders/o1/accept")
      .insert_header(bearer(PROVIDER))
      .to_request(),
  )
  .await;
  assert_eq!(by_provider.status(), StatusCode::OK);
  let body: Value = test::read_body_json(by_provider).await;
  assert_eq!(body["status"], "AKTIV");
  assert_eq!(store.snapshot::<Order>("o1").unwrap().status, OrderStatus::Active);
}

#[actix_web::test]
#[serial]
async fn rejecting_without_a_reason_is_a_bad_request() {
  let fx = fixture();
  seed_clearing_order(&fx.store, "o1");
  let payments = fx.payments.clone();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let resp = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/orders/o1/reject")
      .insert_header(bearer(PROVIDER))
      .set_json(json!({ "reason": "   " }))
      .to_request(),
  )
  .await;

  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  assert!(payments.refunds().is_empty());
}

#[actix_web::test]
#[serial]
async fn unknown_order_is_not_found() {
  let fx = fixture();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let resp = test::call_service(
    &app,
    test::TestRequest::get()
      .uri("/api/v1/orders/missing")
      .insert_header(bearer(PROVIDER))
      .to_request(),
  )
  .await;

  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
#[serial]
async fn customer_creates_an_escrow_payment() {
  let fx = fixture();
  fx.payments.add_account("acct_provider-1", true);
  fx.store
    .insert(&ProviderProfile {
      provider_id: PROVIDER.to_string(),
      email: Some("provider-1@example.com".to_string()),
      connected_account_id: Some("acct_provider-1".to_string()),
      updated_at: day(1, 0),
    })
    .unwrap();
  seed_draft(&fx.store, "d1", 10_000);
  let payments = fx.payments.clone();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let resp = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/payments/escrow")
      .insert_header(bearer(CUSTOMER))
      .set_json(json!({ "draftId": "d1", "providerId": PROVIDER, "amountInCents": 10_000 }))
      .to_request(),
  )
  .await;

  assert_eq!(resp.status(), StatusCode::CREATED);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["applicationFeeInCents"], 450);
  assert_eq!(body["destinationAccountId"], "acct_provider-1");
  assert_eq!(payments.intents().len(), 1);
}

#[actix_web::test]
#[serial]
async fn signed_webhook_creates_the_order() {
  let fx = fixture();
  seed_draft(&fx.store, "d1", 10_000);
  let store = fx.store.clone();
  let now = fx.clock.now();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let payload = booking_paid_payload("d1");
  let signature = sign(&payload, WEBHOOK_SECRET, now.timestamp()).unwrap();
  let resp = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/webhooks/stripe")
      .insert_header(("stripe-signature", signature))
      .set_payload(payload)
      .to_request(),
  )
  .await;

  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["outcome"], "processed");
  assert!(body["orderId"].is_string());
  assert_eq!(store.count(Collection::Orders), 1);
}

#[actix_web::test]
#[serial]
async fn webhook_with_a_bad_signature_changes_nothing() {
  let fx = fixture();
  seed_draft(&fx.store, "d1", 10_000);
  let store = fx.store.clone();
  let now = fx.clock.now();
  let app = test::init_service(App::new().app_data(web::Data::new(fx.state)).configure(configure_app_routes)).await;

  let payload = booking_paid_payload("d1");
  let signature = sign(&payload, "whsec_other", now.timestamp()).unwrap();
  let resp = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/webhooks/stripe")
      .insert_header(("stripe-signature", signature))
      .set_payload(payload)
      .to_request(),
  )
  .await;

  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  assert_eq!(store.count(Collection::Orders), 0);

  let unsigned = test::call_service(
    &app,
    test::TestRequest::post()
      .uri("/api/v1/webhooks/stripe")
      .set_payload(booking_paid_payload("d1"))
      .to_request(),
  )
  .await;
  assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);
}
