// escrow-core/src/config.rs

use crate::error::{CoreError, CoreResult};
use chrono::Duration;

/// Tunables of the coordinator. Everything with a business meaning (fees, caps,
/// lock lifetime) lives here rather than in the code paths that use it.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingPolicy {
  /// ISO currency code passed to the processor, lowercase.
  pub currency: String,
  /// Platform share of a booking payment, as a fraction of the amount.
  pub booking_fee_rate: f64,
  /// Platform share of an additional-hours payment.
  pub additional_hours_fee_rate: f64,
  /// Hours a provider may be booked for on one calendar day across hour-based orders.
  pub daily_hour_cap: f64,
  pub payment_lock_ttl_secs: i64,
  /// Upper bound on attempts of a conflicting transaction.
  pub transaction_attempts: u32,
  pub notifications_enabled: bool,
}

impl Default for BillingPolicy {
  fn default() -> Self {
    Self {
      currency: "eur".to_string(),
      booking_fee_rate: 0.045,
      additional_hours_fee_rate: 0.045,
      daily_hour_cap: 10.0,
      payment_lock_ttl_secs: 120,
      transaction_attempts: 5,
      notifications_enabled: true,
    }
  }
}

impl BillingPolicy {
  pub fn validate(&self) -> CoreResult<()> {
    let rate_ok = |rate: f64| (0.0..1.0).contains(&rate);
    if !rate_ok(self.booking_fee_rate) || !rate_ok(self.additional_hours_fee_rate) {
      return Err(CoreError::InvalidArgument(
        "Fee rates must be fractions in [0, 1).".to_string(),
      ));
    }
    if !(self.daily_hour_cap > 0.0 && self.daily_hour_cap <= 24.0) {
      return Err(CoreError::InvalidArgument(format!(
        "Daily hour cap {} is outside (0, 24].",
        self.daily_hour_cap
      )));
    }
    if self.payment_lock_ttl_secs <= 0 {
      return Err(CoreError::InvalidArgument("Payment lock TTL must be positive.".to_string()));
    }
    if self.transaction_attempts == 0 {
      return Err(CoreError::InvalidArgument(
        "At least one transaction attempt is required.".to_string(),
      ));
    }
    if self.currency.trim().is_empty() {
      return Err(CoreError::InvalidArgument("Currency must be set.".to_string()));
    }
    Ok(())
  }

  pub fn lock_ttl(&self) -> Duration {
    Duration::seconds(self.payment_lock_ttl_secs)
  }
}
