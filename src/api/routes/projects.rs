// api/routes/projects.rs — project CRUD + stats.

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
use crate::events::{ProjectBody, ProjectEvent, TaskBody, UserRef};
use crate::identity::AuthUser;
use crate::stats;
use crate::storage::ProjectRow;
use crate::AppContext;

#[derive(Deserialize)]
pub struct ProjectRequest {
    pub name: Option<String>,
}

impl ProjectRequest {
    fn require_name(&self) -> Result<&str, ApiError> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::Validation("Project name is required".to_string()))
    }
}

/// Project fields + owner + member list, the shape used by list and get.
async fn project_with_relations(ctx: &AppContext, project: &ProjectRow) -> Result<Value, ApiError> {
    let owner = ctx
        .storage
        .get_user(&project.owner_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("project owner missing from store"))?;
    let members: Vec<Value> = ctx
        .storage
        .list_members(&project.id)
        .await?
        .iter()
        .map(|m| {
            json!({
                "id": m.membership_id,
                "user": { "id": m.user_id, "email": m.email },
            })
        })
        .collect();

    let mut value = json!(ProjectBody::from(project));
    value["owner"] = json!(UserRef::from(&owner));
    value["members"] = json!(members);
    Ok(value)
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let projects = ctx.storage.list_projects_for_user(&caller.id).await?;
    let mut out = Vec::with_capacity(projects.len());
    for project in &projects {
        let mut value = project_with_relations(&ctx, project).await?;
        value["taskCount"] = json!(ctx.storage.count_tasks(&project.id).await?);
        out.push(value);
    }
    Ok(Json(json!(out)))
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(caller): AuthUser,
    Json(body): Json<ProjectRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = body.require_name()?;
    let project = ctx.storage.create_project(name, &caller.id).await?;

    let mut value = json!(ProjectBody::from(&project));
    value["owner"] = json!(UserRef::from(&caller));
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Project created successfully",
            "project": value,
        })),
    ))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let (project, _) = access::check_access(&ctx.storage, &caller.id, &project_id).await?;
    let mut value = project_with_relations(&ctx, &project).await?;
    let tasks: Vec<TaskBody> = ctx
        .storage
        .list_tasks(&project.id)
        .await?
        .iter()
        .map(TaskBody::from)
        .collect();
    value["tasks"] = json!(tasks);
    Ok(Json(value))
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
    Json(body): Json<ProjectRequest>,
) -> Result<Json<Value>, ApiError> {
    access::check_ownership(&ctx.storage, &caller.id, &project_id).await?;
    let name = body.require_name()?;

    ctx.storage.rename_project(&project_id, name).await?;
    let project = ctx
        .storage
        .get_project(&project_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("project missing after rename"))?;

    let body = ProjectBody::from(&project);
    ctx.rooms
        .broadcast(&project_id, &ProjectEvent::ProjectUpdated(body.clone()));

    let mut value = json!(body);
    value["owner"] = json!(UserRef::from(&caller));
    Ok(Json(json!({
        "message": "Project updated successfully",
        "project": value,
    })))
}

pub async fn delete(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    access::check_ownership(&ctx.storage, &caller.id, &project_id).await?;

    // Memberships and tasks cascade with the project row.
    ctx.storage.delete_project(&project_id).await?;

    ctx.rooms.broadcast(
        &project_id,
        &ProjectEvent::ProjectDeleted {
            id: project_id.clone(),
        },
    );
    Ok(Json(json!({ "message": "Project deleted successfully" })))
}

pub async fn stats(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    access::check_access(&ctx.storage, &caller.id, &project_id).await?;
    let counts = stats::recompute(&ctx.storage, &project_id).await?;
    Ok(Json(json!(counts)))
}
