// api/routes/users.rs — own profile + member-invite search.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::events::{UserBody, UserRef};
use crate::identity::{self, AuthUser};
use crate::AppContext;

const SEARCH_RESULT_CAP: i64 = 10;

pub async fn profile(AuthUser(caller): AuthUser) -> Json<Value> {
    Json(json!(UserBody::from(&caller)))
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn update_profile(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(caller): AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = match body.email.as_deref().filter(|e| !e.is_empty()) {
        Some(email) => {
            let in_use = ctx
                .storage
                .get_user_by_email(email)
                .await?
                .is_some_and(|existing| existing.id != caller.id);
            if in_use {
                return Err(ApiError::Conflict("Email already in use".to_string()));
            }
            email.to_string()
        }
        None => caller.email.clone(),
    };
    let password_hash = match body.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => identity::hash_password(password)?,
        None => caller.password_hash.clone(),
    };

    ctx.storage
        .update_user(&caller.id, &email, &password_hash)
        .await?;
    let user = ctx
        .storage
        .get_user(&caller.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user missing after profile update"))?;

    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": UserBody::from(&user),
    })))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub email: Option<String>,
}

pub async fn search(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(caller): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let term = query
        .email
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation("Email search term is required".to_string()))?;

    let hits: Vec<UserRef> = ctx
        .storage
        .search_users(term, &caller.id, SEARCH_RESULT_CAP)
        .await?
        .iter()
        .map(UserRef::from)
        .collect();
    Ok(Json(json!(hits)))
}
