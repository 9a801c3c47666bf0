// api/routes/tasks.rs — task CRUD with partial updates and assignee checks.
//
// All task operations are access-gated (owner or member). Status-affecting
// mutations broadcast their event and then republish project stats; both are
// best-effort and never fail the response.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

use crate::access;
use crate::error::ApiError;
use crate::events::{ProjectEvent, TaskBody, TaskDeletedBody};
use crate::identity::AuthUser;
use crate::stats;
use crate::storage::{ProjectRow, TaskStatus};
use crate::AppContext;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assignee_id: Option<String>,
}

/// Partial update. `assignee_id` distinguishes an omitted field (leave
/// untouched) from an explicit null (clear the assignee).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "some_nullable")]
    pub assignee_id: Option<Option<String>>,
}

fn some_nullable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn parse_status(raw: &str) -> Result<TaskStatus, ApiError> {
    TaskStatus::from_str(raw)
        .map_err(|_| ApiError::Validation(format!("Invalid task status '{raw}'")))
}

/// The assignee, if set, must satisfy the same authorization relation as any
/// caller: project owner or membership holder.
async fn ensure_assignable(
    ctx: &AppContext,
    project: &ProjectRow,
    assignee_id: &str,
) -> Result<(), ApiError> {
    if assignee_id == project.owner_id {
        return Ok(());
    }
    match ctx.storage.find_membership(&project.id, assignee_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::InvalidAssignee),
    }
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    access::check_access(&ctx.storage, &caller.id, &project_id).await?;
    let tasks: Vec<TaskBody> = ctx
        .storage
        .list_tasks(&project_id)
        .await?
        .iter()
        .map(TaskBody::from)
        .collect();
    Ok(Json(json!(tasks)))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, task_id)): Path<(String, String)>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    access::check_access(&ctx.storage, &caller.id, &project_id).await?;
    let task = ctx
        .storage
        .get_task_in_project(&task_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
    Ok(Json(json!(TaskBody::from(&task))))
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    AuthUser(caller): AuthUser,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (project, _) = access::check_access(&ctx.storage, &caller.id, &project_id).await?;

    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation("Task title is required".to_string()))?;
    let status = match body.status.as_deref() {
        Some(raw) => parse_status(raw)?,
        None => TaskStatus::Todo,
    };
    if let Some(assignee_id) = body.assignee_id.as_deref() {
        ensure_assignable(&ctx, &project, assignee_id).await?;
    }

    let task = ctx
        .storage
        .create_task(
            &project_id,
            title,
            body.description.as_deref().unwrap_or(""),
            status,
            body.assignee_id.as_deref(),
        )
        .await?;

    let task_body = TaskBody::from(&task);
    ctx.rooms
        .broadcast(&project_id, &ProjectEvent::TaskCreated(task_body.clone()));
    stats::publish(&ctx.storage, &ctx.rooms, &project_id).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Task created successfully",
            "task": task_body,
        })),
    ))
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, task_id)): Path<(String, String)>,
    AuthUser(caller): AuthUser,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    let (project, _) = access::check_access(&ctx.storage, &caller.id, &project_id).await?;

    let existing = ctx
        .storage
        .get_task_in_project(&task_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    // Validate supplied fields before any write.
    let title = match body.title.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::Validation("Task title is required".to_string())),
        Some(title) => title,
        None => existing.title.as_str(),
    };
    let old_status = TaskStatus::from_str(&existing.status)
        .map_err(|e| ApiError::Internal(e.context("stored task status is corrupt")))?;
    let new_status = match body.status.as_deref() {
        Some(raw) => parse_status(raw)?,
        None => old_status,
    };
    let assignee_id = match &body.assignee_id {
        Some(Some(assignee_id)) => {
            ensure_assignable(&ctx, &project, assignee_id).await?;
            Some(assignee_id.as_str())
        }
        Some(None) => None,
        None => existing.assignee_id.as_deref(),
    };
    let description = body
        .description
        .as_deref()
        .unwrap_or(existing.description.as_str());

    ctx.storage
        .update_task(&task_id, title, description, new_status, assignee_id)
        .await?;
    let task = ctx
        .storage
        .get_task(&task_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("task missing after update"))?;

    // One event per update call: a status change suppresses task-updated.
    let task_body = TaskBody::from(&task);
    if new_status != old_status {
        ctx.rooms.broadcast(
            &project_id,
            &ProjectEvent::TaskStatusChanged {
                task: task_body.clone(),
                old_status,
                new_status,
            },
        );
        stats::publish(&ctx.storage, &ctx.rooms, &project_id).await;
    } else {
        ctx.rooms
            .broadcast(&project_id, &ProjectEvent::TaskUpdated(task_body.clone()));
    }

    Ok(Json(json!({
        "message": "Task updated successfully",
        "task": task_body,
    })))
}

pub async fn delete(
    State(ctx): State<Arc<AppContext>>,
    Path((project_id, task_id)): Path<(String, String)>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Value>, ApiError> {
    access::check_access(&ctx.storage, &caller.id, &project_id).await?;

    let existing = ctx
        .storage
        .get_task_in_project(&task_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    ctx.storage.delete_task(&task_id).await?;

    ctx.rooms.broadcast(
        &project_id,
        &ProjectEvent::TaskDeleted(TaskDeletedBody {
            id: existing.id.clone(),
            project_id: project_id.clone(),
            status: existing.status.clone(),
        }),
    );
    stats::publish(&ctx.storage, &ctx.rooms, &project_id).await;

    Ok(Json(json!({ "message": "Task deleted successfully" })))
}
