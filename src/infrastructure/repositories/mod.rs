//! Repository Implementations
//!
//! PostgreSQL implementations of the collaborator traits defined in the
//! domain layer.
//!
//! - **PgUserDirectory** - identity lookups for the handshake
//! - **PgMessageStore** - thread messages, read markers and participation
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use crate::infrastructure::repositories::{PgMessageStore, PgUserDirectory};
//!
//! fn collaborators(pool: PgPool) {
//!     let directory = PgUserDirectory::new(pool.clone());
//!     let store = PgMessageStore::new(pool);
//! }
//! ```

pub mod message_repository;
pub mod user_repository;

pub use message_repository::PgMessageStore;
pub use user_repository::PgUserDirectory;
