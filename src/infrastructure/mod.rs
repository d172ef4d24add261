//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Database pool (PostgreSQL)
//! - Collaborator implementations backed by the database
//! - Prometheus metrics

pub mod database;
pub mod metrics;
pub mod repositories;
