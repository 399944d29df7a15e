//! Terraform request lifecycle service.
//!
//! Reconciles the plan, apply, and destroy workflow runs of an
//! infrastructure change into a single canonical status. Facts arrive from
//! signed GitHub webhooks and, when those were lost, from on-demand API
//! refreshes; clients poll the derived status or follow the change stream.

pub mod clock;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod polling;
pub mod provider;
pub mod repair;
pub mod server;
pub mod store;
pub mod stream;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
