//! Broadcast rooms.
//!
//! A room is a named group of connections. Names follow the
//! `<kind>:<id>` convention clients and other subsystems rely on.

use super::identity::{Role, OPERATOR_ROLES};

/// A named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    Role(Role),
    User(String),
    Crew(String),
    Job(String),
    Thread(String),
    Analytics(String),
}

impl Room {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn crew(id: impl Into<String>) -> Self {
        Self::Crew(id.into())
    }

    pub fn job(id: impl Into<String>) -> Self {
        Self::Job(id.into())
    }

    pub fn thread(id: impl Into<String>) -> Self {
        Self::Thread(id.into())
    }

    pub fn analytics(dashboard: impl Into<String>) -> Self {
        Self::Analytics(dashboard.into())
    }

    /// Rooms of the roles that supervise field activity.
    pub fn operators() -> Vec<Room> {
        OPERATOR_ROLES.iter().copied().map(Room::Role).collect()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Room::Role(_) => "role",
            Room::User(_) => "user",
            Room::Crew(_) => "crew",
            Room::Job(_) => "job",
            Room::Thread(_) => "thread",
            Room::Analytics(_) => "analytics",
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::Role(role) => write!(f, "role:{}", role),
            Room::User(id) => write!(f, "user:{}", id),
            Room::Crew(id) => write!(f, "crew:{}", id),
            Room::Job(id) => write!(f, "job:{}", id),
            Room::Thread(id) => write!(f, "thread:{}", id),
            Room::Analytics(dashboard) => write!(f, "analytics:{}", dashboard),
        }
    }
}
