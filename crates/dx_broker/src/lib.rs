//! dx_broker: RabbitMQ adapter.
//!
//! Two halves, matching the broker's two protocols: [`mgmt`] wraps the
//! management HTTP API for administrative operations, and [`listeners`]
//! consumes the three event queues over AMQP. [`provisioner`] implements
//! the core `BrokerControl` port on top of the management client.

pub mod listeners;
pub mod mgmt;
pub mod provisioner;

pub use mgmt::MgmtClient;
pub use provisioner::{BrokerProvisioner, VhostNames};
