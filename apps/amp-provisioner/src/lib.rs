//! Provisioning service that drives AMP game server instances through the
//! lifecycle of the orders that own them.

pub mod config;
pub mod host;
pub mod memory;
pub mod metrics;
pub mod provisioner;
pub mod routes;
pub mod state;
pub mod telemetry;
