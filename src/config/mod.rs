//! # Configuration Module
//!
//! This module handles application configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realtime_gateway::config::Settings;
//!
//! let settings = Settings::load()?;
//! let limits = settings.gateway.limits();
//! println!("Up to {} connections per user", limits.max_connections_per_user);
//! ```

mod settings;

pub use settings::*;
