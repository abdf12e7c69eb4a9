// escrow-core/src/memory/mod.rs

//! In-process implementations of the ports, for tests, demos and local runs.

pub mod clock;
pub mod notifier;
pub mod payments;
pub mod store;

pub use clock::ManualClock;
pub use notifier::RecordingNotifier;
pub use payments::{MockPaymentProcessor, RecordedIntent};
pub use store::InMemoryStore;
