//! Bearer token authentication and role checks
//!
//! Tokens are HS256 JWTs asserting identity only. Role and active status are
//! always read from the store.

use crate::error::{Result, ScoringError};
use crate::models::{Role, User};
use crate::observability::{AuditEventType, AuditLogger};
use crate::state::AppState;
use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

pub fn generate_token(user_id: Uuid, secret: &str, ttl_secs: i64) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ScoringError::Internal(format!("token encoding: {}", e)))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| ScoringError::Unauthenticated(format!("invalid token: {}", e)))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Resolve a raw token to an active user
pub async fn resolve_user(state: &AppState, token: &str) -> Result<User> {
    let claims = verify_token(token, &state.config.jwt_secret)?;

    let user = state
        .store()
        .get_user(claims.sub)
        .await?
        .ok_or_else(|| ScoringError::Unauthenticated("unknown user".to_string()))?;

    if !user.is_active {
        return Err(ScoringError::Unauthenticated("user is inactive".to_string()));
    }
    Ok(user)
}

pub async fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = bearer_token(headers)
        .ok_or_else(|| ScoringError::Unauthenticated("missing bearer token".to_string()))?;

    match resolve_user(state, token).await {
        Ok(user) => Ok(user),
        Err(e) => {
            if matches!(e, ScoringError::Unauthenticated(_)) {
                warn!(error = %e, "Authentication failed");
                AuditLogger::security(state.store(), AuditEventType::AuthFailed, None, &e.to_string())
                    .await;
            }
            Err(e)
        }
    }
}

/// Admin stands in for every official role but never for a judge
pub fn role_allows(user_role: Role, required: Role) -> bool {
    user_role == required || (user_role == Role::Admin && required != Role::Judge)
}

pub async fn require_role(state: &AppState, headers: &HeaderMap, required: Role) -> Result<User> {
    let user = require_auth(state, headers).await?;
    if role_allows(user.role, required) {
        return Ok(user);
    }

    let details = format!("{} role required, caller is {}", required, user.role);
    AuditLogger::security(
        state.store(),
        AuditEventType::UnauthorizedAccess,
        Some(user.id),
        &details,
    )
    .await;
    Err(ScoringError::forbidden(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generate_and_verify_token() {
        let user = Uuid::new_v4();
        let token = generate_token(user, "secret", 3600).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate_token(Uuid::new_v4(), "secret", 3600).unwrap();
        let err = verify_token(&token, "other").unwrap_err();
        assert!(matches!(err, ScoringError::Unauthenticated(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = generate_token(Uuid::new_v4(), "secret", -3600).unwrap();
        assert!(verify_token(&token, "secret").is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn test_admin_never_acts_as_judge() {
        assert!(role_allows(Role::Admin, Role::TallyMaster));
        assert!(role_allows(Role::Admin, Role::Auditor));
        assert!(role_allows(Role::Admin, Role::Board));
        assert!(!role_allows(Role::Admin, Role::Judge));
        assert!(role_allows(Role::Judge, Role::Judge));
        assert!(!role_allows(Role::Auditor, Role::TallyMaster));
    }
}
