//! Identity entity and the identity collaborator traits.
//!
//! Users, roles and crews are owned by the identity service. The gateway
//! fetches an identity once per connection and caches it for the
//! connection's lifetime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Platform role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Dispatcher,
    Crew,
    Customer,
}

/// Roles whose rooms receive presence changes, crew telemetry and alerts.
pub const OPERATOR_ROLES: [Role; 3] = [Role::Admin, Role::SuperAdmin, Role::Dispatcher];

impl Role {
    /// Convert from database string representation.
    ///
    /// Unknown roles fall back to the least privileged role.
    pub fn from_db(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "super_admin" | "superadmin" => Self::SuperAdmin,
            "admin" => Self::Admin,
            "dispatcher" => Self::Dispatcher,
            "crew" => Self::Crew,
            _ => Self::Customer,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Dispatcher => "dispatcher",
            Self::Crew => "crew",
            Self::Customer => "customer",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }

    pub fn is_operator(&self) -> bool {
        OPERATOR_ROLES.contains(self)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authenticated identity cached on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub crew_id: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role, crew_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            crew_id,
        }
    }
}

/// User record as returned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub role: Role,
    pub crew_id: Option<String>,
    pub is_active: bool,
}

impl UserRecord {
    pub fn into_identity(self) -> Identity {
        Identity {
            user_id: self.id,
            role: self.role,
            crew_id: self.crew_id,
        }
    }
}

/// Claims extracted from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    /// Expiry as a Unix timestamp
    pub expires_at: i64,
}

/// Verifies bearer tokens issued by the identity service.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Fails with `AppError::Unauthorized` for invalid or expired tokens.
    async fn verify(&self, token: &str) -> Result<TokenClaims, AppError>;
}

/// Read access to user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id, returning `None` when no such user exists.
    async fn find_active_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError>;
}
