//! HTTP Handlers
//!
//! Request handlers for the operational endpoints.

pub mod health;
pub mod presence;
