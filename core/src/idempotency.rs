// escrow-core/src/idempotency.rs

//! Short-lived payment locks.
//!
//! A lock is a document in `paymentLocks` keyed by the request fingerprint. While it is
//! live, a second request with the same fingerprint is refused instead of creating a
//! second payment intent. Locks are released by their owner once the guarded work is
//! done and expire on their own otherwise.

use crate::coordinator::Deps;
use crate::error::CoreResult;
use crate::model::PaymentLock;
use crate::ports::clock::Clock;
use crate::ports::store::{run_transaction, Collection, DocumentStore, TransactionExt};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAcquisition {
  pub acquired: bool,
  /// The request currently holding the lock; the caller's own id when `acquired`.
  pub owner_request_id: String,
  pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IdempotencyLock {
  store: Arc<dyn DocumentStore>,
  clock: Arc<dyn Clock>,
  attempts: u32,
}

impl IdempotencyLock {
  pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, attempts: u32) -> Self {
    Self { store, clock, attempts }
  }

  pub fn from_deps(deps: &Deps) -> Self {
    Self::new(deps.store.clone(), deps.clock.clone(), deps.policy.transaction_attempts)
  }

  /// Fingerprint of a payment request: identical requests inside the same TTL-sized
  /// time bucket share a key.
  pub fn payment_key(customer_id: &str, provider_id: &str, amount_in_cents: i64, now: DateTime<Utc>, ttl: Duration) -> String {
    let bucket_secs = ttl.num_seconds().max(1);
    let bucket = now.timestamp().div_euclid(bucket_secs);
    format!("{customer_id}_{provider_id}_{amount_in_cents}_{bucket}")
  }

  #[instrument(name = "IdempotencyLock::acquire", skip(self, ttl), fields(lock_key = %key), err(Display))]
  pub async fn acquire(&self, key: &str, ttl: Duration, request_id: &str) -> CoreResult<LockAcquisition> {
    run_transaction(self.attempts, || async move {
      let now = self.clock.now();
      let mut tx = self.store.begin().await?;
      if let Some(existing) = tx.load::<PaymentLock>(key).await? {
        if existing.is_live(now) {
          debug!(owner = %existing.owner_request_id, "Payment lock is held by another request.");
          return Ok(LockAcquisition {
            acquired: false,
            owner_request_id: existing.owner_request_id,
            expires_at: existing.expires_at,
          });
        }
        debug!(expired_at = %existing.expires_at, "Replacing expired payment lock.");
      }

      let lock = PaymentLock {
        lock_key: key.to_string(),
        owner_request_id: request_id.to_string(),
        acquired_at: now,
        expires_at: now + ttl,
      };
      tx.save(&lock)?;
      tx.commit().await?;
      Ok(LockAcquisition {
        acquired: true,
        owner_request_id: lock.owner_request_id,
        expires_at: lock.expires_at,
      })
    })
    .await
  }

  /// Deletes the lock if `request_id` still owns it. Never fails: an unreleased lock
  /// simply expires.
  #[instrument(name = "IdempotencyLock::release", skip(self), fields(lock_key = %key))]
  pub async fn release(&self, key: &str, request_id: &str) {
    let result = run_transaction(self.attempts, || async move {
      let mut tx = self.store.begin().await?;
      match tx.load::<PaymentLock>(key).await? {
        Some(lock) if lock.owner_request_id == request_id => {
          tx.delete(Collection::PaymentLocks, key);
          tx.commit().await?;
          Ok(true)
        }
        _ => Ok(false),
      }
    })
    .await;

    match result {
      Ok(true) => debug!("Payment lock released."),
      Ok(false) => debug!("Payment lock already gone or taken over; nothing to release."),
      Err(e) => warn!(error = %e, "Failed to release payment lock; it will expire on its own."),
    }
  }
}
