//! dx_core: pure domain crate for the resource-server gateway.
//!
//! Holds the error taxonomy, authorization context and pipeline, the
//! catalogue filter resolver, the broker-fed caches, subscription domain
//! types, and the `SubscriptionService` lifecycle manager. All external
//! systems (Postgres, RabbitMQ, catalogue, token verification) are reached
//! through the port traits in [`ports`]; adapter crates implement them.

pub mod auth;
pub mod cache;
pub mod catalogue;
pub mod error;
pub mod ports;
pub mod service;
pub mod subscription;

pub use error::DxError;

pub type Result<T> = std::result::Result<T, DxError>;
