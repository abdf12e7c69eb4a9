// escrow-core/src/model/mod.rs

//! Persisted records. Field names serialize in camelCase, matching the stored layout.

pub mod draft;
pub mod event;
pub mod order;
pub mod payment_lock;
pub mod provider;
pub mod time_tracking;

pub use draft::{Draft, DraftStatus};
pub use event::{ProcessedEvent, ProcessorEvent};
pub use order::{BookingKind, ChatRecord, DecisionKind, Order, OrderStatus, PendingDecision, StatusChange};
pub use payment_lock::PaymentLock;
pub use provider::ProviderProfile;
pub use time_tracking::{
  ApprovalDecision, ApprovalRequest, ApprovalStatus, EntryCategory, EntryStatus, OrderTimeTracking, TimeEntry,
  TrackingStatus, TrackingTotals,
};

use crate::error::{CoreError, CoreResult};

/// The authenticated subject an operation runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
  subject: String,
}

impl Caller {
  pub fn new(subject: impl Into<String>) -> CoreResult<Self> {
    let subject = subject.into();
    if subject.trim().is_empty() {
      return Err(CoreError::Unauthenticated("Caller identity is missing.".to_string()));
    }
    Ok(Self { subject })
  }

  pub fn id(&self) -> &str {
    &self.subject
  }

  pub fn is(&self, user_id: &str) -> bool {
    self.subject == user_id
  }
}

impl std::fmt::Display for Caller {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.subject)
  }
}
