// escrow_service/src/lib.rs

//! HTTP surface of the escrow coordinator: Postgres document store, Stripe REST
//! client, mail notifier and the actix-web routes that drive `escrow_core`.

pub mod adapters;
pub mod config;
pub mod errors;
pub mod state;
pub mod web;
