//! Application Services
//!
//! Services that coordinate domain collaborators.
//!
//! ## Available Services
//!
//! - **Authenticator**: handshake token verification and user lookup
//! - **JwtTokenVerifier**: HS256 bearer token verification

pub mod auth_service;

pub use auth_service::{Authenticator, Claims, JwtTokenVerifier};
