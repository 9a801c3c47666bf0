//! Credentials: argon2id password hashing and opaque bearer tokens.
//!
//! A token is a random 32-char hex string handed to the client once; only
//! its SHA-256 digest is stored, alongside an expiry. Every resource route
//! authenticates through the [`AuthUser`] extractor.

use anyhow::Result;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::storage::{Storage, UserRow};
use crate::AppContext;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// SHA-256 hex digest of a token — the only form that touches the store.
fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Mint a bearer token for a user and persist its digest.
/// The plaintext token is returned exactly once.
pub async fn issue_token(storage: &Storage, user_id: &str, ttl_hours: u32) -> Result<String> {
    let token = Uuid::new_v4().to_string().replace('-', "");
    let expires_at = (Utc::now() + Duration::hours(i64::from(ttl_hours))).to_rfc3339();
    storage
        .insert_auth_token(&token_digest(&token), user_id, &expires_at)
        .await?;
    Ok(token)
}

/// Resolve an `Authorization` header value to its user.
pub async fn authenticate_bearer(
    storage: &Storage,
    header_value: Option<&str>,
) -> Result<UserRow, ApiError> {
    let Some(token) = header_value.and_then(|v| v.strip_prefix("Bearer ")) else {
        return Err(ApiError::Unauthenticated(
            "Authentication required".to_string(),
        ));
    };
    if token.is_empty() {
        return Err(ApiError::Unauthenticated("Token not provided".to_string()));
    }

    let Some(row) = storage.get_auth_token(&token_digest(token)).await? else {
        return Err(ApiError::Unauthenticated("Invalid token".to_string()));
    };

    let expired = DateTime::parse_from_rfc3339(&row.expires_at)
        .map(|t| t <= Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(ApiError::Unauthenticated("Token expired".to_string()));
    }

    match storage.get_user(&row.user_id).await? {
        Some(user) => Ok(user),
        None => Err(ApiError::Unauthenticated("Invalid token".to_string())),
    }
}

/// Extractor: the authenticated caller on every resource route.
pub struct AuthUser(pub UserRow);

impl FromRequestParts<Arc<AppContext>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let user = authenticate_bearer(&state.storage, header).await?;
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }

    #[test]
    fn minted_tokens_are_opaque_hex() {
        let token = Uuid::new_v4().to_string().replace('-', "");
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn issued_token_authenticates_its_user() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let user = storage.create_user("a@example.com", "h").await.unwrap();

        let token = issue_token(&storage, &user.id, 24).await.unwrap();
        let header = format!("Bearer {token}");
        let resolved = authenticate_bearer(&storage, Some(&header)).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn missing_invalid_and_expired_tokens_are_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let user = storage.create_user("a@example.com", "h").await.unwrap();

        let err = authenticate_bearer(&storage, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(m) if m == "Authentication required"));

        let err = authenticate_bearer(&storage, Some("Basic xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(m) if m == "Authentication required"));

        let err = authenticate_bearer(&storage, Some("Bearer deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(m) if m == "Invalid token"));

        // Insert a token whose expiry is already in the past.
        let stale = (Utc::now() - Duration::hours(1)).to_rfc3339();
        storage
            .insert_auth_token(&token_digest("oldtoken"), &user.id, &stale)
            .await
            .unwrap();
        let err = authenticate_bearer(&storage, Some("Bearer oldtoken"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(m) if m == "Token expired"));
    }
}
