//! Authorization guard: membership-class resolution for project access.
//!
//! A caller is authorized for a project iff they own it or hold a membership
//! row. Both "project does not exist" and "caller has no relation" yield the
//! same `NotFound` — existence is hidden from unauthorized callers so project
//! ids cannot be enumerated.

use crate::error::ApiError;
use crate::storage::{ProjectRow, Storage};

/// The message shared by every access-denied path.
pub const ACCESS_DENIED: &str = "Project not found or access denied";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Member,
}

/// Resolve the caller's relation to a project.
///
/// Gates every read and every task operation. Fails `NotFound` when the
/// project is missing or the caller has neither relation.
pub async fn check_access(
    storage: &Storage,
    caller_id: &str,
    project_id: &str,
) -> Result<(ProjectRow, Role), ApiError> {
    let Some(project) = storage.get_project(project_id).await? else {
        return Err(ApiError::NotFound(ACCESS_DENIED.to_string()));
    };
    if project.owner_id == caller_id {
        return Ok((project, Role::Owner));
    }
    match storage.find_membership(project_id, caller_id).await? {
        Some(_) => Ok((project, Role::Member)),
        None => Err(ApiError::NotFound(ACCESS_DENIED.to_string())),
    }
}

/// Require ownership.
///
/// Gates project update/delete, invite, and member removal. A member who is
/// not the owner gets `Forbidden`; a caller with no relation at all gets the
/// same `NotFound` as a missing project.
pub async fn check_ownership(
    storage: &Storage,
    caller_id: &str,
    project_id: &str,
) -> Result<ProjectRow, ApiError> {
    match check_access(storage, caller_id, project_id).await? {
        (project, Role::Owner) => Ok(project),
        (_, Role::Member) => Err(ApiError::Forbidden(
            "Only the project owner can perform this action".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        storage: Storage,
        owner_id: String,
        member_id: String,
        stranger_id: String,
        project_id: String,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let owner = storage.create_user("owner@example.com", "h").await.unwrap();
        let member = storage.create_user("member@example.com", "h").await.unwrap();
        let stranger = storage
            .create_user("stranger@example.com", "h")
            .await
            .unwrap();
        let project = storage.create_project("Sprint1", &owner.id).await.unwrap();
        storage
            .create_membership(&project.id, &member.id)
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            storage,
            owner_id: owner.id,
            member_id: member.id,
            stranger_id: stranger.id,
            project_id: project.id,
        }
    }

    #[tokio::test]
    async fn owner_and_member_resolve_to_their_roles() {
        let f = fixture().await;
        let (_, role) = check_access(&f.storage, &f.owner_id, &f.project_id)
            .await
            .unwrap();
        assert_eq!(role, Role::Owner);
        let (_, role) = check_access(&f.storage, &f.member_id, &f.project_id)
            .await
            .unwrap();
        assert_eq!(role, Role::Member);
    }

    #[tokio::test]
    async fn stranger_and_missing_project_are_indistinguishable() {
        let f = fixture().await;
        let denied = check_access(&f.storage, &f.stranger_id, &f.project_id)
            .await
            .unwrap_err();
        let missing = check_access(&f.storage, &f.owner_id, "no-such-project")
            .await
            .unwrap_err();
        match (&denied, &missing) {
            (ApiError::NotFound(a), ApiError::NotFound(b)) => assert_eq!(a, b),
            other => panic!("expected two NotFound errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ownership_check_distinguishes_member_from_stranger() {
        let f = fixture().await;
        assert!(check_ownership(&f.storage, &f.owner_id, &f.project_id)
            .await
            .is_ok());
        assert!(matches!(
            check_ownership(&f.storage, &f.member_id, &f.project_id).await,
            Err(ApiError::Forbidden(_))
        ));
        // A stranger must not learn the project exists.
        assert!(matches!(
            check_ownership(&f.storage, &f.stranger_id, &f.project_id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn revoked_membership_loses_access() {
        let f = fixture().await;
        let membership = f
            .storage
            .find_membership(&f.project_id, &f.member_id)
            .await
            .unwrap()
            .unwrap();
        f.storage.delete_membership(&membership.id).await.unwrap();
        assert!(matches!(
            check_access(&f.storage, &f.member_id, &f.project_id).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
