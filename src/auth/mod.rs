//! Bearer-token authentication.
//!
//! Identity and role assignment live outside this service; it only verifies
//! HS256 tokens and turns their claims into an explicit [`Capability`] that is
//! handed to every lifecycle operation.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::lifecycle::{ActorRole, Capability};
use crate::AppState;

mod permissions;

pub use permissions::{consts, roles};

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,              // Subject (user ID)
    pub roles: Vec<String>,       // Role names assigned by the identity provider
    pub permissions: Vec<String>, // Explicit permissions
    pub jti: String,              // Token ID
    pub iat: i64,                 // Issued at time
    pub exp: i64,                 // Expiration time
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token carries no known role")]
    UnknownRole,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: ActorRole,
    pub permissions: Vec<String>,
    pub token_id: String,
}

impl AuthUser {
    /// Check if the user has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// The capability token passed into lifecycle operations.
    pub fn capability(&self) -> Capability {
        match self.role {
            ActorRole::Customer => Capability::customer(self.user_id),
            role => Capability::staff(
                self.user_id,
                role,
                self.role.is_staff() && self.has_permission(consts::ORDERS_FORCE_CANCEL),
            ),
        }
    }

    pub fn require_staff(&self) -> Result<(), ServiceError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("staff access required".to_string()))
        }
    }
}

fn role_from_claims(claims: &Claims) -> Result<ActorRole, AuthError> {
    let has = |name: &str| claims.roles.iter().any(|r| r.eq_ignore_ascii_case(name));
    if has(roles::ADMIN) {
        Ok(ActorRole::Admin)
    } else if has(roles::MODERATOR) {
        Ok(ActorRole::Moderator)
    } else if has(roles::CUSTOMER) {
        Ok(ActorRole::Customer)
    } else {
        Err(AuthError::UnknownRole)
    }
}

/// Verifies and issues HS256 access tokens.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;
        Ok(claims)
    }

    /// Resolves a bearer token into the calling user.
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let role = role_from_claims(&claims)?;
        Ok(AuthUser {
            user_id,
            role,
            permissions: claims.permissions,
            token_id: claims.jti,
        })
    }

    /// Issues a token; used by operators' tooling and the test suite.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        role: &str,
        permissions: &[&str],
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            roles: vec![role.to_string()],
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AuthError::MissingAuth)?;

        let user = state.auth.authenticate(token)?;
        debug!(user_id = %user.user_id, role = %user.role, "authenticated request");
        Ok(user)
    }
}
