// escrow-core/src/model/payment_lock.rs

use crate::ports::store::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLock {
  pub lock_key: String,
  pub owner_request_id: String,
  pub acquired_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl PaymentLock {
  pub fn is_live(&self, now: DateTime<Utc>) -> bool {
    self.expires_at > now
  }
}

impl Document for PaymentLock {
  const COLLECTION: Collection = Collection::PaymentLocks;

  fn document_id(&self) -> &str {
    &self.lock_key
  }
}
