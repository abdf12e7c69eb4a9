// escrow-core/src/model/time_tracking.rs

use crate::ports::store::{Collection, Document};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
  Active,
  SubmittedForApproval,
  PartiallyApproved,
  FullyApproved,
  Completed,
}

/// Per-order aggregate of the logged time. The totals are derived from the order's
/// entries and rewritten in the same transaction as every entry change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTimeTracking {
  pub order_id: String,
  pub customer_id: String,
  pub provider_id: String,
  pub planned_hours: f64,
  pub hourly_rate_cents: i64,
  pub total_logged_hours: f64,
  pub total_approved_hours: f64,
  pub total_billed_hours: f64,
  pub total_billed_cents: i64,
  pub status: TrackingStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl OrderTimeTracking {
  pub fn apply_totals(&mut self, totals: &TrackingTotals, at: DateTime<Utc>) {
    self.total_logged_hours = totals.logged_hours;
    self.total_approved_hours = totals.approved_hours;
    self.total_billed_hours = totals.billed_hours;
    self.total_billed_cents = totals.billed_cents;
    self.updated_at = at;
  }

  pub fn totals(&self) -> TrackingTotals {
    TrackingTotals {
      logged_hours: self.total_logged_hours,
      approved_hours: self.total_approved_hours,
      billed_hours: self.total_billed_hours,
      billed_cents: self.total_billed_cents,
    }
  }
}

impl Document for OrderTimeTracking {
  const COLLECTION: Collection = Collection::OrderTimeTracking;

  fn document_id(&self) -> &str {
    &self.order_id
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
  /// Hours covered by the original booking price.
  Original,
  /// Hours beyond the booking; billed separately once approved.
  Additional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  Logged,
  Submitted,
  CustomerApproved,
  CustomerRejected,
  Billed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
  pub entry_id: String,
  pub order_id: String,
  pub provider_id: String,
  pub customer_id: String,
  pub category: EntryCategory,
  pub hours: f64,
  pub description: String,
  #[serde(default)]
  pub work_date: Option<NaiveDate>,
  #[serde(default)]
  pub billable_amount_in_cents: Option<i64>,
  pub status: EntryStatus,
  #[serde(default)]
  pub approval_request_id: Option<String>,
  #[serde(default)]
  pub payment_intent_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
  pub fn counts_as_approved(&self) -> bool {
    matches!(self.status, EntryStatus::CustomerApproved | EntryStatus::Billed)
  }

  pub fn is_billable(&self) -> bool {
    self.status == EntryStatus::CustomerApproved && self.category == EntryCategory::Additional
  }
}

impl Document for TimeEntry {
  const COLLECTION: Collection = Collection::TimeEntries;

  fn document_id(&self) -> &str {
    &self.entry_id
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
  Pending,
  Approved,
  Rejected,
  PartiallyApproved,
}

/// The customer's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
  Approved,
  Rejected,
  PartiallyApproved,
}

impl ApprovalDecision {
  pub fn as_str(&self) -> &'static str {
    match self {
      ApprovalDecision::Approved => "approved",
      ApprovalDecision::Rejected => "rejected",
      ApprovalDecision::PartiallyApproved => "partially_approved",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
  pub request_id: String,
  pub order_id: String,
  pub provider_id: String,
  pub customer_id: String,
  pub time_entry_ids: Vec<String>,
  pub total_hours: f64,
  pub total_amount_in_cents: i64,
  pub status: ApprovalStatus,
  #[serde(default)]
  pub provider_message: Option<String>,
  #[serde(default)]
  pub customer_feedback: Option<String>,
  pub submitted_at: DateTime<Utc>,
  #[serde(default)]
  pub responded_at: Option<DateTime<Utc>>,
}

impl Document for ApprovalRequest {
  const COLLECTION: Collection = Collection::ApprovalRequests;

  fn document_id(&self) -> &str {
    &self.request_id
  }
}

/// Aggregate hours and billed amount derived from a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingTotals {
  pub logged_hours: f64,
  pub approved_hours: f64,
  pub billed_hours: f64,
  pub billed_cents: i64,
}

impl TrackingTotals {
  /// Approved hours include billed entries, so `billed <= approved <= logged` holds
  /// for any entry set.
  pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a TimeEntry>) -> Self {
    entries.into_iter().fold(Self::default(), |mut totals, entry| {
      totals.logged_hours += entry.hours;
      if entry.counts_as_approved() {
        totals.approved_hours += entry.hours;
      }
      if entry.status == EntryStatus::Billed {
        totals.billed_hours += entry.hours;
        totals.billed_cents += entry.billable_amount_in_cents.unwrap_or(0);
      }
      totals
    })
  }

  pub fn is_monotone(&self) -> bool {
    self.billed_hours <= self.approved_hours && self.approved_hours <= self.logged_hours
  }
}
