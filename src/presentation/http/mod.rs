//! HTTP Layer
//!
//! Routes and handlers for health, metrics and presence queries.

pub mod handlers;
pub mod routes;
