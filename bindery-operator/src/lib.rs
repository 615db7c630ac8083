//! The Bindery operator binary's library half: everything `main.rs` and the
//! integration tests need, split out so reconciler logic is unit-testable
//! without going through `main`.

pub mod config;
pub mod context;
pub mod crdgen;
pub mod error;
pub mod health;
pub mod metrics;
pub mod reconcilers;
pub mod telemetry;

pub use error::{Error, Result};
