//! HTTP API Module
//!
//! Provides health, status and metrics endpoints for the DNS Seed.

mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::ApiServer;
