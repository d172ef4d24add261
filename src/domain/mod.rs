//! # Domain Layer
//!
//! Core types of the real-time gateway, independent of the transport and of
//! the concrete identity / message-store backends.
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure or presentation layers
//! - Collaborator traits define data access contracts
//! - Entities encapsulate domain behavior

pub mod entities;

pub use entities::*;
