// escrow-core/src/ports/payments.rs

//! Payment processor contract: destination-charge intents, refunds and connected
//! accounts.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
  /// The processor understood the request and refused it.
  #[error("Request rejected: {0}")]
  Rejected(String),

  #[error("Processor unreachable: {0}")]
  Transport(String),

  #[error("Unexpected processor response: {0}")]
  InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIntentRequest {
  pub amount_in_cents: i64,
  pub currency: String,
  pub application_fee_in_cents: i64,
  /// Connected account receiving the funds net of the application fee.
  pub transfer_destination: String,
  pub metadata: BTreeMap<String, String>,
  /// Forwarded to the processor so a replayed request cannot produce a second intent.
  pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
  pub id: String,
  pub client_secret: String,
  pub amount_in_cents: i64,
  pub application_fee_in_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
  pub id: String,
  pub payment_intent_id: String,
  pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
  pub id: String,
  pub charges_enabled: bool,
  pub payouts_enabled: bool,
  /// Outstanding verification requirements reported by the processor.
  pub requirements_due: Vec<String>,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
  async fn create_intent(&self, request: CreateIntentRequest) -> Result<PaymentIntent, ProcessorError>;

  /// Refunds the full captured amount of an intent.
  async fn refund(&self, payment_intent_id: &str) -> Result<Refund, ProcessorError>;

  async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError>;

  async fn create_connected_account(&self, email: &str, country: &str) -> Result<ConnectedAccount, ProcessorError>;
}
