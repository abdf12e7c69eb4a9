// escrow-core/src/ports/mod.rs

//! Seams to the outside world. The coordinator only ever talks to these traits;
//! `crate::memory` and the service crate provide implementations.

pub mod clock;
pub mod notifier;
pub mod payments;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use notifier::{Notification, Notifier};
pub use payments::{ConnectedAccount, CreateIntentRequest, PaymentIntent, PaymentProcessor, ProcessorError, Refund};
pub use store::{
  run_transaction, Collection, Document, DocumentStore, FieldFilter, Query, StoreError, StoreExt, Transaction,
  TransactionExt,
};
