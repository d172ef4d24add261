//! Authentication Service
//!
//! Resolves a handshake token into an [`Identity`]: verify the token, then
//! load the user and check the account is active.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtSettings;
use crate::domain::{Identity, TokenClaims, TokenVerifier, UserDirectory};
use crate::shared::error::{AppError, GatewayError};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
}

/// HS256 token verifier sharing its secret with the identity service
#[derive(Clone)]
pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl JwtTokenVerifier {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
        }
    }

    /// Issue a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::Unauthorized("token expired".into())
                }
                _ => AppError::Unauthorized("malformed or unsigned token".into()),
            })?;

        Ok(TokenClaims {
            user_id: token_data.claims.sub,
            expires_at: token_data.claims.exp,
        })
    }
}

/// Handshake authenticator
#[derive(Clone)]
pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn UserDirectory>,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            verifier,
            directory,
        }
    }

    /// Checks run in order and stop at the first failure: token present,
    /// token valid, user exists, user active.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, GatewayError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(GatewayError::MissingToken)?;

        let claims = self.verifier.verify(token).await.map_err(|e| match e {
            AppError::Unauthorized(reason) => GatewayError::InvalidToken(reason),
            other => GatewayError::Collaborator(other),
        })?;

        let user = self
            .directory
            .find_active_user(&claims.user_id)
            .await?
            .ok_or(GatewayError::UserNotFound)?;

        if !user.is_active {
            return Err(GatewayError::UserInactive);
        }

        Ok(user.into_identity())
    }
}
