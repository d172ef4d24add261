//! Application Layer
//!
//! Orchestrates the identity collaborators on behalf of the presentation
//! layer.

pub mod services;

pub use services::{Authenticator, JwtTokenVerifier};
