//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// JWT verification settings
    pub jwt: JwtSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// WebSocket transport limits
    pub websocket: WebSocketSettings,

    /// Connection gateway limits and timers
    pub gateway: GatewaySettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Shared secret the identity service signs access tokens with
    pub secret: String,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,
}

/// Connection gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Live connections allowed per user. The per-address cap is twice this.
    pub max_connections_per_user: usize,

    /// Rate limiter window length in seconds
    pub rate_limit_window_secs: u64,

    /// Events allowed per connection inside one window
    pub rate_limit_max_events: u32,

    /// Typing indicator lifetime in milliseconds
    pub typing_timeout_ms: u64,

    /// Absolute connection lifetime in seconds, measured from admission
    pub idle_timeout_secs: u64,

    /// Interval between heartbeat sweeps and socket pings in seconds
    pub heartbeat_interval_secs: u64,

    /// Silence after which a socket is treated as dead, in seconds
    pub heartbeat_timeout_secs: u64,

    /// Upper bound on token verification + user lookup for a new socket
    pub handshake_timeout_secs: u64,

    /// Honour X-Forwarded-For / X-Real-IP when resolving the remote address
    pub trust_proxy_headers: bool,

    /// Leak-detection thresholds reported by the heartbeat sweep
    pub leak_thresholds: LeakThresholds,
}

/// Soft limits that make the heartbeat sweep log a warning when exceeded.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct LeakThresholds {
    pub max_connections: usize,
    pub max_rooms: usize,
    pub max_typing_timers: usize,
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_rooms: 50_000,
            max_typing_timers: 5_000,
        }
    }
}

/// Runtime limits consumed by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayLimits {
    pub max_connections_per_user: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max_events: u32,
    pub typing_timeout: Duration,
    pub idle_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub leak_thresholds: LeakThresholds,
}

impl GatewayLimits {
    /// Connections allowed from a single remote address.
    pub fn max_connections_per_address(&self) -> usize {
        self.max_connections_per_user * 2
    }
}

impl Default for GatewayLimits {
    fn default() -> Self {
        Self {
            max_connections_per_user: 5,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_events: 100,
            typing_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30 * 60),
            heartbeat_interval: Duration::from_secs(30),
            leak_thresholds: LeakThresholds::default(),
        }
    }
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// if the JWT secret is too short, or if a gateway limit is zero.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 16384_i64)? // 16KB
            .set_default("gateway.max_connections_per_user", 5_i64)?
            .set_default("gateway.rate_limit_window_secs", 60_i64)?
            .set_default("gateway.rate_limit_max_events", 100_i64)?
            .set_default("gateway.typing_timeout_ms", 5000_i64)?
            .set_default("gateway.idle_timeout_secs", 1800_i64)?
            .set_default("gateway.heartbeat_interval_secs", 30_i64)?
            .set_default("gateway.heartbeat_timeout_secs", 90_i64)?
            .set_default("gateway.handshake_timeout_secs", 10_i64)?
            .set_default("gateway.trust_proxy_headers", false)?
            .set_default("gateway.leak_thresholds.max_connections", 10_000_i64)?
            .set_default("gateway.leak_thresholds.max_rooms", 50_000_i64)?
            .set_default("gateway.leak_thresholds.max_typing_timers", 5_000_i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__GATEWAY__IDLE_TIMEOUT_SECS=600 -> gateway.idle_timeout_secs = 600
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| settings.validate())
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.gateway.max_connections_per_user == 0 {
            return Err(ConfigError::Message(
                "gateway.max_connections_per_user must be greater than zero".into(),
            ));
        }
        if self.gateway.rate_limit_window_secs == 0 || self.gateway.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Message(
                "gateway rate limit window and heartbeat interval must be greater than zero".into(),
            ));
        }
        if self.gateway.heartbeat_timeout_secs <= self.gateway.heartbeat_interval_secs {
            return Err(ConfigError::Message(
                "gateway.heartbeat_timeout_secs must be longer than the heartbeat interval".into(),
            ));
        }
        Ok(self)
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl GatewaySettings {
    /// Convert the configured numbers into the manager's runtime limits.
    pub fn limits(&self) -> GatewayLimits {
        GatewayLimits {
            max_connections_per_user: self.max_connections_per_user,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
            rate_limit_max_events: self.rate_limit_max_events,
            typing_timeout: Duration::from_millis(self.typing_timeout_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            leak_thresholds: self.leak_thresholds,
        }
    }

    /// Timeout applied to the authentication handshake of a new socket.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// How long a socket may stay silent, pongs included, before it is dropped.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
