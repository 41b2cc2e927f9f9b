//! Bootstrap and metrics exposition for the cluster image registry operator
//!
//! - [`config`] - controller config file (`servingInfo`)
//! - [`server`] - TLS policy, metric catalogue, HTTPS metrics server, shutdown
//! - [`coordinator`] - startup sequence and shutdown race
//! - [`operator`] - run capability used by the binary

pub mod config;
pub mod coordinator;
pub mod operator;
pub mod server;

#[cfg(test)]
mod test_support;
