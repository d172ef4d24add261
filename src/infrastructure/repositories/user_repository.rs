//! User Directory Implementation
//!
//! PostgreSQL implementation of the UserDirectory trait over the identity
//! service's `users` table.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Role, UserDirectory, UserRecord};
use crate::shared::error::AppError;

/// Database row for the columns the gateway needs.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    role: String,
    crew_id: Option<Uuid>,
    is_active: bool,
}

impl UserRow {
    fn into_record(self) -> UserRecord {
        UserRecord {
            id: self.id.to_string(),
            role: Role::from_db(&self.role),
            crew_id: self.crew_id.map(|id| id.to_string()),
            is_active: self.is_active,
        }
    }
}

/// PostgreSQL user directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_active_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        // Ids that are not UUIDs cannot exist in the table
        let Ok(id) = Uuid::parse_str(user_id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, role, crew_id, is_active
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_record()))
    }
}
