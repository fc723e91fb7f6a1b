//! HTTP API Module
//!
//! Control-plane inbound (directory and policy snapshots) plus health,
//! status and metrics endpoints.

mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::{run_api_server, ApiState};
