// escrow-core/src/memory/payments.rs

use crate::ports::payments::{ConnectedAccount, CreateIntentRequest, PaymentIntent, PaymentProcessor, ProcessorError, Refund};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedIntent {
  pub intent: PaymentIntent,
  pub request: CreateIntentRequest,
}

#[derive(Debug, Default)]
struct ProcessorState {
  intents: Vec<RecordedIntent>,
  refunds: Vec<Refund>,
  accounts: HashMap<String, ConnectedAccount>,
  fail_intents: bool,
  fail_refunds: bool,
}

/// Simulated processor: records every call, replays idempotency keys, and can be told
/// to fail intents or refunds.
#[derive(Debug, Default)]
pub struct MockPaymentProcessor {
  state: Mutex<ProcessorState>,
  latency: Duration,
}

impl MockPaymentProcessor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every call sleeps for `latency` before answering.
  pub fn with_latency(latency: Duration) -> Self {
    Self {
      state: Mutex::new(ProcessorState::default()),
      latency,
    }
  }

  pub fn add_account(&self, account_id: &str, charges_enabled: bool) {
    self.state.lock().accounts.insert(
      account_id.to_string(),
      ConnectedAccount {
        id: account_id.to_string(),
        charges_enabled,
        payouts_enabled: charges_enabled,
        requirements_due: if charges_enabled {
          Vec::new()
        } else {
          vec!["individual.verification.document".to_string()]
        },
      },
    );
  }

  pub fn fail_intents(&self, fail: bool) {
    self.state.lock().fail_intents = fail;
  }

  pub fn fail_refunds(&self, fail: bool) {
    self.state.lock().fail_refunds = fail;
  }

  pub fn intents(&self) -> Vec<RecordedIntent> {
    self.state.lock().intents.clone()
  }

  pub fn refunds(&self) -> Vec<Refund> {
    self.state.lock().refunds.clone()
  }

  async fn simulate_latency(&self) {
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
  }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
  #[instrument(skip(self, request), fields(amount = request.amount_in_cents, destination = %request.transfer_destination))]
  async fn create_intent(&self, request: CreateIntentRequest) -> Result<PaymentIntent, ProcessorError> {
    self.simulate_latency().await;
    let mut state = self.state.lock();
    if state.fail_intents {
      return Err(ProcessorError::Transport("simulated processor outage".to_string()));
    }
    if request.amount_in_cents <= 0 {
      return Err(ProcessorError::Rejected("Amount must be greater than zero".to_string()));
    }
    if let Some(key) = &request.idempotency_key {
      if let Some(existing) = state.intents.iter().find(|r| r.request.idempotency_key.as_ref() == Some(key)) {
        info!(payment_intent_id = %existing.intent.id, "Replaying intent for a known idempotency key.");
        return Ok(existing.intent.clone());
      }
    }

    let id = format!("pi_mock_{}", Uuid::new_v4().simple());
    let intent = PaymentIntent {
      client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
      id,
      amount_in_cents: request.amount_in_cents,
      application_fee_in_cents: request.application_fee_in_cents,
    };
    info!(payment_intent_id = %intent.id, "Simulated payment intent created.");
    state.intents.push(RecordedIntent {
      intent: intent.clone(),
      request,
    });
    Ok(intent)
  }

  #[instrument(skip(self))]
  async fn refund(&self, payment_intent_id: &str) -> Result<Refund, ProcessorError> {
    self.simulate_latency().await;
    let mut state = self.state.lock();
    if state.fail_refunds {
      return Err(ProcessorError::Rejected(format!(
        "charge for {payment_intent_id} cannot be refunded"
      )));
    }
    let refund = Refund {
      id: format!("re_mock_{}", Uuid::new_v4().simple()),
      payment_intent_id: payment_intent_id.to_string(),
      status: "succeeded".to_string(),
    };
    state.refunds.push(refund.clone());
    Ok(refund)
  }

  async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
    self.simulate_latency().await;
    self
      .state
      .lock()
      .accounts
      .get(account_id)
      .cloned()
      .ok_or_else(|| ProcessorError::Rejected(format!("No such account: {account_id}")))
  }

  async fn create_connected_account(&self, email: &str, country: &str) -> Result<ConnectedAccount, ProcessorError> {
    self.simulate_latency().await;
    let account = ConnectedAccount {
      id: format!("acct_mock_{}", Uuid::new_v4().simple()),
      charges_enabled: false,
      payouts_enabled: false,
      requirements_due: vec!["external_account".to_string(), "individual.verification.document".to_string()],
    };
    info!(account_id = %account.id, %email, %country, "Simulated connected account created.");
    self.state.lock().accounts.insert(account.id.clone(), account.clone());
    Ok(account)
  }
}
