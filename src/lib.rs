//! # Realtime Gateway Library
//!
//! Real-time connection gateway for the field operations platform:
//! - WebSocket gateway with handshake authentication and per-user /
//!   per-address connection caps
//! - Room-based fan-out for jobs, crews, roles, threads and dashboards
//! - Presence, typing indicators and per-connection rate limiting
//! - Operational HTTP endpoints (health, metrics, presence)
//!
//! ## Module Structure
//!
//! ```text
//! realtime_gateway/
//! +-- config/         Configuration management
//! +-- domain/         Identity, rooms, messages and collaborator traits
//! +-- application/    Handshake authentication
//! +-- infrastructure/ PostgreSQL collaborators and Prometheus metrics
//! +-- presentation/   HTTP routes, middleware and the WebSocket gateway
//! +-- shared/         Error types
//! ```

// Configuration module
pub mod config;

// Domain layer
pub mod domain;

// Application layer
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
