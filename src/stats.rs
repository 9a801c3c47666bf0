//! Per-project task statistics.
//!
//! Recomputed from the store after any status-affecting task mutation and
//! broadcast to the project's channel. Best-effort: a failure here is logged
//! and swallowed — it never fails the mutation that triggered it.

use anyhow::Result;
use tracing::warn;

use crate::events::{ProjectEvent, ProjectRooms, StatusCounts};
use crate::storage::Storage;

/// Current task counts per status for a project, zero-filled — the returned
/// map always has all three statuses, never a partial shape.
pub async fn recompute(storage: &Storage, project_id: &str) -> Result<StatusCounts> {
    let mut counts = StatusCounts {
        todo: 0,
        in_progress: 0,
        done: 0,
    };
    for (status, count) in storage.count_tasks_by_status(project_id).await? {
        match status.as_str() {
            "todo" => counts.todo = count,
            "in-progress" => counts.in_progress = count,
            "done" => counts.done = count,
            other => warn!(status = other, project_id, "ignoring unknown task status"),
        }
    }
    Ok(counts)
}

/// Recompute and broadcast `project-stats-updated`. Runs after the mutation
/// commits; errors are logged, never propagated to the caller.
pub async fn publish(storage: &Storage, rooms: &ProjectRooms, project_id: &str) {
    match recompute(storage, project_id).await {
        Ok(counts) => rooms.broadcast(project_id, &ProjectEvent::StatsUpdated(counts)),
        Err(e) => warn!(err = %format!("{e:#}"), project_id, "stats recompute failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TaskStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn recompute_zero_fills_missing_statuses() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let owner = storage.create_user("o@example.com", "h").await.unwrap();
        let project = storage.create_project("P", &owner.id).await.unwrap();

        let counts = recompute(&storage, &project.id).await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                todo: 0,
                in_progress: 0,
                done: 0
            }
        );

        storage
            .create_task(&project.id, "a", "", TaskStatus::Todo, None)
            .await
            .unwrap();
        storage
            .create_task(&project.id, "b", "", TaskStatus::Todo, None)
            .await
            .unwrap();
        storage
            .create_task(&project.id, "c", "", TaskStatus::Done, None)
            .await
            .unwrap();

        let counts = recompute(&storage, &project.id).await.unwrap();
        assert_eq!(counts.todo, 2);
        assert_eq!(counts.in_progress, 0);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.total(), storage.count_tasks(&project.id).await.unwrap());
    }
}
