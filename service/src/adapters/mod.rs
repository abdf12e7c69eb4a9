// escrow_service/src/adapters/mod.rs

// Implementations of the coordinator's ports.
pub mod email;
pub mod postgres_store;
pub mod stripe;

pub use email::EmailNotifier;
pub use postgres_store::PgDocumentStore;
pub use stripe::StripeClient;
