// api/routes/auth.rs — registration and login (no bearer credential).

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::events::UserBody;
use crate::identity;
use crate::AppContext;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl CredentialsRequest {
    /// Both fields present and non-empty, or a 400.
    fn require(&self) -> Result<(&str, &str), ApiError> {
        match (self.email.as_deref(), self.password.as_deref()) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Ok((email, password))
            }
            _ => Err(ApiError::Validation(
                "Email and password are required".to_string(),
            )),
        }
    }
}

pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (email, password) = body.require()?;

    if ctx.storage.get_user_by_email(email).await?.is_some() {
        return Err(ApiError::Conflict(
            "User with this email already exists".to_string(),
        ));
    }

    let password_hash = identity::hash_password(password)?;
    let user = ctx.storage.create_user(email, &password_hash).await?;
    let token = identity::issue_token(&ctx.storage, &user.id, ctx.config.token_ttl_hours).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": UserBody::from(&user),
            "token": token,
        })),
    ))
}

pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<Value>, ApiError> {
    let (email, password) = body.require()?;

    // One error for unknown email and wrong password alike.
    let user = ctx
        .storage
        .get_user_by_email(email)
        .await?
        .filter(|u| identity::verify_password(password, &u.password_hash))
        .ok_or_else(|| ApiError::Unauthenticated("Invalid credentials".to_string()))?;

    let token = identity::issue_token(&ctx.storage, &user.id, ctx.config.token_ttl_hours).await?;

    Ok(Json(json!({
        "message": "Login successful",
        "user": UserBody::from(&user),
        "token": token,
    })))
}
