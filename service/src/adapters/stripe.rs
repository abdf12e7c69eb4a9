// escrow_service/src/adapters/stripe.rs

//! Stripe over its REST API: form-encoded requests with basic auth, no SDK.

use async_trait::async_trait;
use escrow_core::ports::{
  ConnectedAccount, CreateIntentRequest, PaymentIntent, PaymentProcessor, ProcessorError, Refund,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone)]
pub struct StripeClient {
  http: reqwest::Client,
  secret_key: String,
  api_base: String,
}

#[derive(Deserialize)]
struct IntentResponse {
  id: String,
  client_secret: Option<String>,
  amount: i64,
  #[serde(default)]
  application_fee_amount: Option<i64>,
}

#[derive(Deserialize)]
struct RefundResponse {
  id: String,
  status: Option<String>,
}

#[derive(Deserialize, Default)]
struct Requirements {
  #[serde(default)]
  currently_due: Vec<String>,
}

#[derive(Deserialize)]
struct AccountResponse {
  id: String,
  #[serde(default)]
  charges_enabled: bool,
  #[serde(default)]
  payouts_enabled: bool,
  #[serde(default)]
  requirements: Option<Requirements>,
}

impl From<AccountResponse> for ConnectedAccount {
  fn from(account: AccountResponse) -> Self {
    ConnectedAccount {
      id: account.id,
      charges_enabled: account.charges_enabled,
      payouts_enabled: account.payouts_enabled,
      requirements_due: account.requirements.unwrap_or_default().currently_due,
    }
  }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
  error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
  message: Option<String>,
  code: Option<String>,
}

/// Form fields of an intent: a destination charge with the platform fee.
fn intent_form(request: &CreateIntentRequest) -> Vec<(String, String)> {
  let mut form = vec![
    ("amount".to_string(), request.amount_in_cents.to_string()),
    ("currency".to_string(), request.currency.clone()),
    ("application_fee_amount".to_string(), request.application_fee_in_cents.to_string()),
    ("transfer_data[destination]".to_string(), request.transfer_destination.clone()),
    ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
  ];
  form.extend(
    request
      .metadata
      .iter()
      .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
  );
  form
}

impl StripeClient {
  pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, ProcessorError> {
    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| ProcessorError::Transport(e.to_string()))?;
    Ok(Self {
      http,
      secret_key: secret_key.into(),
      api_base: api_base.into().trim_end_matches('/').to_string(),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/v1/{}", self.api_base, path)
  }

  async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ProcessorError> {
    let response = request
      .basic_auth(&self.secret_key, None::<&str>)
      .send()
      .await
      .map_err(|e| ProcessorError::Transport(e.to_string()))?;
    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| ProcessorError::Transport(e.to_string()))?;

    if status.is_success() {
      return serde_json::from_slice(&body).map_err(|e| ProcessorError::InvalidResponse(e.to_string()));
    }
    let detail = serde_json::from_slice::<ErrorEnvelope>(&body)
      .ok()
      .map(|envelope| match (envelope.error.code, envelope.error.message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (_, Some(message)) => message,
        (Some(code), None) => code,
        (None, None) => status.to_string(),
      })
      .unwrap_or_else(|| status.to_string());
    warn!(%status, %detail, "Stripe request failed.");
    if status.is_client_error() {
      Err(ProcessorError::Rejected(detail))
    } else {
      Err(ProcessorError::Transport(detail))
    }
  }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
  #[instrument(name = "StripeClient::create_intent", skip_all, fields(amount = request.amount_in_cents, destination = %request.transfer_destination), err(Display))]
  async fn create_intent(&self, request: CreateIntentRequest) -> Result<PaymentIntent, ProcessorError> {
    let mut builder = self.http.post(self.url("payment_intents")).form(&intent_form(&request));
    if let Some(key) = &request.idempotency_key {
      builder = builder.header("Idempotency-Key", key.as_str());
    }
    let intent: IntentResponse = self.send(builder).await?;
    let client_secret = intent
      .client_secret
      .ok_or_else(|| ProcessorError::InvalidResponse(format!("Intent {} has no client secret", intent.id)))?;
    info!(payment_intent_id = %intent.id, "Payment intent created.");
    Ok(PaymentIntent {
      id: intent.id,
      client_secret,
      amount_in_cents: intent.amount,
      application_fee_in_cents: intent.application_fee_amount.unwrap_or(request.application_fee_in_cents),
    })
  }

  #[instrument(name = "StripeClient::refund", skip(self), err(Display))]
  async fn refund(&self, payment_intent_id: &str) -> Result<Refund, ProcessorError> {
    let builder = self
      .http
      .post(self.url("refunds"))
      .form(&[("payment_intent", payment_intent_id)]);
    let refund: RefundResponse = self.send(builder).await?;
    Ok(Refund {
      id: refund.id,
      payment_intent_id: payment_intent_id.to_string(),
      status: refund.status.unwrap_or_else(|| "pending".to_string()),
    })
  }

  #[instrument(name = "StripeClient::retrieve_account", skip(self), err(Display))]
  async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
    let account: AccountResponse = self.send(self.http.get(self.url(&format!("accounts/{account_id}")))).await?;
    Ok(account.into())
  }

  #[instrument(name = "StripeClient::create_connected_account", skip(self, email), err(Display))]
  async fn create_connected_account(&self, email: &str, country: &str) -> Result<ConnectedAccount, ProcessorError> {
    let builder = self.http.post(self.url("accounts")).form(&[
      ("type", "express"),
      ("country", country),
      ("email", email),
      ("capabilities[card_payments][requested]", "true"),
      ("capabilities[transfers][requested]", "true"),
    ]);
    let account: AccountResponse = self.send(builder).await?;
    info!(account_id = %account.id, "Connected account created.");
    Ok(account.into())
  }
}
