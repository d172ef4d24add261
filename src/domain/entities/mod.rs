//! # Domain Entities
//!
//! Core domain types used by the connection gateway.
//!
//! - **Identity**: authenticated user, role and crew cached per connection
//! - **ConnectionId**: opaque identifier of an accepted transport
//! - **Room**: named broadcast group (`role:`, `user:`, `crew:`, `job:`, `thread:`, `analytics:`)
//! - **ThreadMessage**: chat content owned by the message store
//!
//! ## Collaborator Traits
//!
//! The identity service and the message store are external systems. Their
//! contracts are defined here and implemented in the infrastructure layer.

mod connection;
mod identity;
mod message;
mod room;

pub use connection::ConnectionId;
pub use identity::{
    Identity, Role, TokenClaims, TokenVerifier, UserDirectory, UserRecord, OPERATOR_ROLES,
};
pub use message::{
    DeletedMessage, MessageStore, NewThreadMessage, ReadMarker, ThreadMessage,
    MAX_MESSAGE_LENGTH,
};
pub use room::Room;
