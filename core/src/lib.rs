// src/lib.rs

//! escrow-core: order lifecycle and escrow payment coordination for a services
//! marketplace.
//!
//! The crate moves a booking through payment capture, provider acceptance or
//! rejection, fulfilment, and billing of additional hours, with:
//!  - Named-step pipelines (`workflow`) for every compound operation.
//!  - Optimistic, retried store transactions behind the `ports::store` traits.
//!  - Short-lived payment locks against duplicate charges.
//!  - Calendar-day availability checks against a provider's active bookings.
//!  - Idempotent consumption of payment processor webhooks.
//!
//! Adapters for a real database, processor and mailer live in the service crate;
//! `memory` holds in-process ones for tests and local runs.

pub mod availability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod escrow;
pub mod idempotency;
pub mod memory;
pub mod model;
pub mod orders;
pub mod ports;
pub mod time_tracking;
pub mod webhook;
pub mod workflow;

// --- Re-exports for the Public API ---

pub use crate::availability::{Availability, AvailabilityChecker, BookingWindow};
pub use crate::config::BillingPolicy;
pub use crate::coordinator::{Coordinator, Deps};
pub use crate::error::{CoreError, CoreResult, ErrorKind};
pub use crate::escrow::{EscrowPayment, EscrowPaymentRequest};
pub use crate::model::Caller;
pub use crate::time_tracking::{BillingOutcome, NewTimeEntry};
pub use crate::webhook::WebhookOutcome;
