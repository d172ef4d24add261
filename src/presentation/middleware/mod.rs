//! Middleware
//!
//! Tower middleware for request processing.

pub mod auth;
pub mod cors;
pub mod logging;

pub use auth::{operator_auth_middleware, AuthOperator};
pub use logging::track_http_metrics;
