//! Application Error Types
//!
//! Centralized error handling with Axum integration, plus the error taxonomy
//! the connection gateway reports back to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 10001, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 10002, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 10003, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, 10004, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, 10005, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
        };

        (status, Json(ErrorResponse { code, message })).into_response()
    }
}

/// Which connection cap rejected an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityScope {
    User,
    Address,
}

impl CapacityScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityScope::User => "user",
            CapacityScope::Address => "address",
        }
    }
}

/// Errors surfaced by the connection gateway.
///
/// Fatal errors (authentication and capacity) close the transport; every
/// other kind is reported to the sender as an `error` event and the
/// connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("User not found")]
    UserNotFound,

    #[error("User account is inactive")]
    UserInactive,

    #[error("Authentication timed out")]
    HandshakeTimeout,

    #[error("Too many connections for this {}", .0.as_str())]
    CapacityExceeded(CapacityScope),

    #[error("Rate limit exceeded, please slow down")]
    RateLimited,

    #[error("Unauthorized: {0}")]
    Forbidden(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Not subscribed to thread {0}")]
    NotSubscribed(String),

    #[error("{0}")]
    Collaborator(#[from] AppError),

    #[error("Gateway unavailable")]
    Unavailable,
}

impl GatewayError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingToken
            | GatewayError::InvalidToken(_)
            | GatewayError::UserNotFound
            | GatewayError::UserInactive
            | GatewayError::HandshakeTimeout => "AUTHENTICATION_FAILED",
            GatewayError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            GatewayError::RateLimited => "RATE_LIMITED",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::InvalidPayload(_) => "INVALID_PAYLOAD",
            GatewayError::NotSubscribed(_) => "NOT_SUBSCRIBED",
            GatewayError::Collaborator(_) => "REQUEST_FAILED",
            GatewayError::Unavailable => "UNAVAILABLE",
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::MissingToken
                | GatewayError::InvalidToken(_)
                | GatewayError::UserNotFound
                | GatewayError::UserInactive
                | GatewayError::HandshakeTimeout
                | GatewayError::CapacityExceeded(_)
                | GatewayError::Unavailable
        )
    }

    /// Message safe to show the client. Internal collaborator failures are
    /// logged and replaced with a generic text.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Collaborator(AppError::Database(e)) => {
                tracing::error!(error = %e, "Message store failure");
                "Request failed, please try again".to_string()
            }
            GatewayError::Collaborator(AppError::Internal(msg)) => {
                tracing::error!(error = %msg, "Collaborator failure");
                "Request failed, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}
