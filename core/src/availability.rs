// escrow-core/src/availability.rs

//! Provider availability.
//!
//! [`check_availability`] is the pure decision; [`AvailabilityChecker`] feeds it from the
//! store for search-time filtering, and the accept transition feeds it from inside its
//! own transaction.

use crate::error::CoreResult;
use crate::model::{BookingKind, Order, OrderStatus};
use crate::ports::store::{Collection, DocumentStore, Query, StoreExt};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Statuses that occupy a provider when a new order is accepted.
pub const ACCEPT_BLOCKING_STATUSES: &[OrderStatus] = &[OrderStatus::Active, OrderStatus::InProgress];

/// Search is stricter: paid orders still awaiting a decision are counted too.
pub const SEARCH_BLOCKING_STATUSES: &[OrderStatus] =
  &[OrderStatus::Active, OrderStatus::InProgress, OrderStatus::Clearing];

#[derive(Debug, Clone, PartialEq)]
pub struct BookingWindow {
  pub order_id: String,
  pub start_at: Option<DateTime<Utc>>,
  pub end_at: Option<DateTime<Utc>>,
  pub kind: BookingKind,
  pub hours: Option<f64>,
}

impl BookingWindow {
  pub fn of_order(order: &Order) -> Self {
    Self {
      order_id: order.order_id.clone(),
      start_at: order.start_at,
      end_at: order.end_at,
      kind: order.booking_kind,
      hours: order.booked_hours,
    }
  }

  /// Inclusive calendar-day range; a missing end means a single-day booking.
  fn day_range(&self) -> Option<(NaiveDate, NaiveDate)> {
    let start = self.start_at?.date_naive();
    let end = self.end_at.map_or(start, |end| end.date_naive());
    Some((start, end.max(start)))
  }

  /// Hour-based bookings without an hour count block their days like whole-day ones.
  fn blocks_whole_day(&self) -> bool {
    self.kind == BookingKind::FullDay || self.hours.is_none()
  }

  fn hours_per_day(&self) -> f64 {
    self.hours.unwrap_or(0.0)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Availability {
  Available,
  Conflict { order_id: String, reason: String },
}

impl Availability {
  pub fn is_available(&self) -> bool {
    matches!(self, Availability::Available)
  }
}

/// Decides whether `candidate` fits next to `existing` bookings of the same provider.
///
/// Overlap is judged per calendar day. A whole-day booking on either side of an
/// overlapping pair is a conflict; two hour-based bookings conflict only when a shared
/// day would exceed `daily_hour_cap`. Bookings without dates are not checked.
pub fn check_availability(candidate: &BookingWindow, existing: &[BookingWindow], daily_hour_cap: f64) -> Availability {
  let Some((cand_start, cand_end)) = candidate.day_range() else {
    warn!(order_id = %candidate.order_id, "Candidate booking has no dates; skipping conflict check.");
    return Availability::Available;
  };

  let mut booked: BTreeMap<NaiveDate, (f64, &str)> = BTreeMap::new();
  for other in existing.iter().filter(|o| o.order_id != candidate.order_id) {
    let Some((start, end)) = other.day_range() else {
      warn!(order_id = %other.order_id, "Existing booking has no dates; skipping conflict check.");
      continue;
    };
    if start > cand_end || end < cand_start {
      continue;
    }

    if candidate.blocks_whole_day() || other.blocks_whole_day() {
      debug!(existing = %other.order_id, "Whole-day overlap.");
      return Availability::Conflict {
        order_id: other.order_id.clone(),
        reason: format!("overlaps with active order {}", other.order_id),
      };
    }

    let shared_start = start.max(cand_start);
    let shared_end = end.min(cand_end);
    for day in shared_start.iter_days().take_while(|d| *d <= shared_end) {
      let slot = booked.entry(day).or_insert((0.0, other.order_id.as_str()));
      slot.0 += other.hours_per_day();
    }
  }

  let requested = candidate.hours_per_day();
  for (day, (hours, first_order)) in &booked {
    if hours + requested > daily_hour_cap {
      return Availability::Conflict {
        order_id: first_order.to_string(),
        reason: format!(
          "overlaps with active order {first_order} on {day}: {hours}h booked plus {requested}h requested exceeds the daily cap of {daily_hour_cap}h"
        ),
      };
    }
  }
  Availability::Available
}

/// Query for the orders of `provider_id` whose status is one of `statuses`.
pub fn blocking_orders_query(provider_id: &str, statuses: &[OrderStatus]) -> Query {
  Query::new(Collection::Orders)
    .where_eq("providerId", provider_id)
    .where_in("status", statuses.iter().copied())
}

/// Search-time availability lookups against committed state.
#[derive(Clone)]
pub struct AvailabilityChecker {
  store: Arc<dyn DocumentStore>,
  daily_hour_cap: f64,
}

impl AvailabilityChecker {
  pub fn new(store: Arc<dyn DocumentStore>, daily_hour_cap: f64) -> Self {
    Self { store, daily_hour_cap }
  }

  #[instrument(name = "AvailabilityChecker::check_provider", skip_all, fields(provider_id = %provider_id), err(Display))]
  pub async fn check_provider(&self, provider_id: &str, candidate: &BookingWindow) -> CoreResult<Availability> {
    let orders: Vec<Order> = self
      .store
      .fetch_where(blocking_orders_query(provider_id, SEARCH_BLOCKING_STATUSES))
      .await?;
    let windows: Vec<BookingWindow> = orders.iter().map(BookingWindow::of_order).collect();
    Ok(check_availability(candidate, &windows, self.daily_hour_cap))
  }

  /// Returns the providers free for `candidate`. Providers whose lookup fails are
  /// left out.
  pub async fn available_providers(&self, provider_ids: &[String], candidate: &BookingWindow) -> Vec<String> {
    let mut available = Vec::with_capacity(provider_ids.len());
    for provider_id in provider_ids {
      match self.check_provider(provider_id, candidate).await {
        Ok(Availability::Available) => available.push(provider_id.clone()),
        Ok(Availability::Conflict { .. }) => {}
        Err(e) => warn!(%provider_id, error = %e, "Availability lookup failed; excluding provider."),
      }
    }
    available
  }
}
