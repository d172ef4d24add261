//! Authentication Middleware
//!
//! Bearer-token validation for the operational HTTP routes. Only operators
//! (admin, super admin, dispatcher) may read presence and gateway state.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::domain::Identity;
use crate::shared::error::{AppError, GatewayError};
use crate::startup::AppState;

/// Authenticated operator extension
#[derive(Debug, Clone)]
pub struct AuthOperator(pub Identity);

/// Middleware that resolves the bearer token and requires an operator role
pub async fn operator_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    // Check for Bearer token
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization header format".into()))?;

    let identity = state
        .authenticator
        .authenticate(Some(token))
        .await
        .map_err(|e| match e {
            GatewayError::Collaborator(inner) => inner,
            other => AppError::Unauthorized(other.to_string()),
        })?;

    if !identity.role.is_operator() {
        return Err(AppError::Forbidden("Operator role required".into()));
    }

    request.extensions_mut().insert(AuthOperator(identity));

    Ok(next.run(request).await)
}
