// api/routes/memberships.rs — member listing, invite, removal.
//
// Listing is access-gated; invite and removal are ownership-gated.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::access;
use crate::error::ApiError;
use crate::events::{MemberBody, MemberListEntry, ProjectEvent, UserBody, UserRef};
use crate::identity::AuthUser;
use crate::AppContext;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub user_id: Option<String>,
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let (project, _) = access::check_access(&ctx.storage, &caller.id, &project_id).await?;

    let owner = ctx
        .storage
        .get_user(&project.owner_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("project owner missing from store"))?;
    let members: Vec<MemberListEntry> = ctx
        .storage
        .list_members(&project_id)
        .await?
        .iter()
        .map(MemberListEntry::from)
        .collect();

    Ok(Json(json!({
        "owner": UserBody::from(&owner),
        "members": members,
    })))
}

pub async fn invite(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
    Json(body): Json<InviteRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let project = access::check_ownership(&ctx.storage, &caller.id, &project_id).await?;

    let user_id = body
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("User id is required".to_string()))?;

    let invitee = ctx
        .storage
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if ctx
        .storage
        .find_membership(&project_id, user_id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "User is already a member of this project".to_string(),
        ));
    }
    if project.owner_id == user_id {
        return Err(ApiError::Conflict(
            "User is already the owner of this project".to_string(),
        ));
    }

    let membership = ctx.storage.create_membership(&project_id, user_id).await?;

    ctx.rooms.broadcast(
        &project_id,
        &ProjectEvent::MemberAdded(MemberBody {
            membership_id: membership.id.clone(),
            project_id: project_id.clone(),
            user: UserRef::from(&invitee),
        }),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Member invited successfully",
            "membership": {
                "id": membership.id,
                "projectId": membership.project_id,
                "userId": membership.user_id,
                "user": UserRef::from(&invitee),
            },
        })),
    ))
}

pub async fn remove(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, membership_id)): Path<(String, String)>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    access::check_ownership(&ctx.storage, &caller.id, &project_id).await?;

    // A membership id belonging to another project is treated as absent.
    let membership = ctx
        .storage
        .get_membership_in_project(&membership_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Membership not found".to_string()))?;

    // Capture the member's identity before the row goes away.
    let removed = ctx
        .storage
        .get_user(&membership.user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("membership user missing from store"))?;

    ctx.storage.delete_membership(&membership_id).await?;

    ctx.rooms.broadcast(
        &project_id,
        &ProjectEvent::MemberRemoved(MemberBody {
            membership_id,
            project_id: project_id.clone(),
            user: UserRef::from(&removed),
        }),
    );

    Ok(Json(json!({ "message": "Member removed successfully" })))
}
