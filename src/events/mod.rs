//! Typed realtime events and the per-project connection registry.
//!
//! A project is a named channel; connections subscribe with explicit
//! join/leave signals. The registry is an owned component on `AppContext`
//! (never ambient global state) and is torn down per-disconnect. Delivery is
//! fire-and-forget: no acknowledgement, no retry, no persistence — a
//! disconnected or never-subscribed client silently misses the event.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::storage::{ProjectMemberRow, ProjectRow, TaskRow, TaskStatus, UserRow};

// ─── Payload contracts ───────────────────────────────────────────────────────
//
// These shapes are shared by broadcast payloads and HTTP response bodies, so
// a client sees one representation of each entity everywhere.

/// User record as exposed to clients. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBody {
    pub id: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&UserRow> for UserBody {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.id.clone(),
            email: row.email.clone(),
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }
}

/// Minimal user reference embedded in membership events and listings.
#[derive(Debug, Clone, Serialize)]
pub struct UserRef {
    pub id: String,
    pub email: String,
}

impl From<&UserRow> for UserRef {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.id.clone(),
            email: row.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBody {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&ProjectRow> for ProjectBody {
    fn from(row: &ProjectRow) -> Self {
        Self {
            id: row.id.clone(),
            name: row.name.clone(),
            owner_id: row.owner_id.clone(),
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBody {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub assignee_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&TaskRow> for TaskBody {
    fn from(row: &TaskRow) -> Self {
        Self {
            id: row.id.clone(),
            project_id: row.project_id.clone(),
            title: row.title.clone(),
            description: row.description.clone(),
            status: row.status.clone(),
            assignee_id: row.assignee_id.clone(),
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBody {
    pub membership_id: String,
    pub project_id: String,
    pub user: UserRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeletedBody {
    pub id: String,
    pub project_id: String,
    pub status: String,
}

/// Fixed-shape per-status task counts. Always carries all three statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub todo: i64,
    #[serde(rename = "in-progress")]
    pub in_progress: i64,
    pub done: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.todo + self.in_progress + self.done
    }
}

/// A member listing entry: membership id plus the member's user record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberListEntry {
    pub membership_id: String,
    pub id: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&ProjectMemberRow> for MemberListEntry {
    fn from(row: &ProjectMemberRow) -> Self {
        Self {
            membership_id: row.membership_id.clone(),
            id: row.user_id.clone(),
            email: row.email.clone(),
            created_at: row.user_created_at.clone(),
            updated_at: row.user_updated_at.clone(),
        }
    }
}

// ─── Event taxonomy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ProjectEvent {
    TaskCreated(TaskBody),
    TaskUpdated(TaskBody),
    TaskStatusChanged {
        task: TaskBody,
        old_status: TaskStatus,
        new_status: TaskStatus,
    },
    TaskDeleted(TaskDeletedBody),
    MemberAdded(MemberBody),
    MemberRemoved(MemberBody),
    ProjectUpdated(ProjectBody),
    ProjectDeleted {
        id: String,
    },
    StatsUpdated(StatusCounts),
}

impl ProjectEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectEvent::TaskCreated(_) => "task-created",
            ProjectEvent::TaskUpdated(_) => "task-updated",
            ProjectEvent::TaskStatusChanged { .. } => "task-status-changed",
            ProjectEvent::TaskDeleted(_) => "task-deleted",
            ProjectEvent::MemberAdded(_) => "member-added",
            ProjectEvent::MemberRemoved(_) => "member-removed",
            ProjectEvent::ProjectUpdated(_) => "project-updated",
            ProjectEvent::ProjectDeleted { .. } => "project-deleted",
            ProjectEvent::StatsUpdated(_) => "project-stats-updated",
        }
    }

    fn data(&self) -> Value {
        match self {
            ProjectEvent::TaskCreated(task) | ProjectEvent::TaskUpdated(task) => {
                json!(task)
            }
            ProjectEvent::TaskStatusChanged {
                task,
                old_status,
                new_status,
            } => {
                let mut value = json!(task);
                value["oldStatus"] = json!(old_status.as_str());
                value["newStatus"] = json!(new_status.as_str());
                value
            }
            ProjectEvent::TaskDeleted(body) => json!(body),
            ProjectEvent::MemberAdded(body) | ProjectEvent::MemberRemoved(body) => json!(body),
            ProjectEvent::ProjectUpdated(body) => json!(body),
            ProjectEvent::ProjectDeleted { id } => json!({ "id": id }),
            ProjectEvent::StatsUpdated(counts) => json!(counts),
        }
    }

    /// Serialize to the wire frame delivered to subscribers.
    pub fn to_frame(&self, project_id: &str) -> String {
        json!({
            "event": self.name(),
            "projectId": project_id,
            "data": self.data(),
        })
        .to_string()
    }
}

// ─── Connection registry ─────────────────────────────────────────────────────

pub type ConnectionId = u64;

/// Channel registry: project id → subscribed connections.
///
/// Join and leave are idempotent per connection — re-joining replaces the
/// existing handle, so a subscriber never receives duplicate copies.
pub struct ProjectRooms {
    inner: Mutex<HashMap<String, HashMap<ConnectionId, mpsc::UnboundedSender<String>>>>,
    next_id: AtomicU64,
}

impl Default for ProjectRooms {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectRooms {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique id for a new connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn join(&self, project_id: &str, conn: ConnectionId, tx: mpsc::UnboundedSender<String>) {
        let mut rooms = self.inner.lock().expect("rooms lock poisoned");
        rooms
            .entry(project_id.to_string())
            .or_default()
            .insert(conn, tx);
    }

    pub fn leave(&self, project_id: &str, conn: ConnectionId) {
        let mut rooms = self.inner.lock().expect("rooms lock poisoned");
        if let Some(subscribers) = rooms.get_mut(project_id) {
            subscribers.remove(&conn);
            if subscribers.is_empty() {
                rooms.remove(project_id);
            }
        }
    }

    /// Remove the connection from every channel it joined.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut rooms = self.inner.lock().expect("rooms lock poisoned");
        rooms.retain(|_, subscribers| {
            subscribers.remove(&conn);
            !subscribers.is_empty()
        });
    }

    /// Fan an event out to every current subscriber of the project's channel,
    /// the acting client included. Dead handles are dropped on the spot;
    /// no subscribers is fine.
    pub fn broadcast(&self, project_id: &str, event: &ProjectEvent) {
        let frame = event.to_frame(project_id);
        let mut rooms = self.inner.lock().expect("rooms lock poisoned");
        let Some(subscribers) = rooms.get_mut(project_id) else {
            return;
        };
        subscribers.retain(|conn, tx| {
            let delivered = tx.send(frame.clone()).is_ok();
            if !delivered {
                debug!(conn, event = event.name(), "dropping dead subscriber");
            }
            delivered
        });
        if subscribers.is_empty() {
            rooms.remove(project_id);
        }
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.inner
            .lock()
            .expect("rooms lock poisoned")
            .get(project_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_event() -> ProjectEvent {
        ProjectEvent::StatsUpdated(StatusCounts {
            todo: 1,
            in_progress: 0,
            done: 2,
        })
    }

    #[test]
    fn join_is_idempotent_per_connection() {
        let rooms = ProjectRooms::new();
        let conn = rooms.next_connection_id();
        let (tx, mut rx) = mpsc::unbounded_channel();

        rooms.join("p1", conn, tx.clone());
        rooms.join("p1", conn, tx);
        assert_eq!(rooms.subscriber_count("p1"), 1);

        rooms.broadcast("p1", &stats_event());
        assert!(rx.try_recv().is_ok());
        // Exactly one copy.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_reaches_all_subscribers_of_the_channel_only() {
        let rooms = ProjectRooms::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        rooms.join("p1", rooms.next_connection_id(), tx_a);
        rooms.join("p1", rooms.next_connection_id(), tx_b);
        rooms.join("p2", rooms.next_connection_id(), tx_other);

        rooms.broadcast("p1", &stats_event());

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn leave_and_disconnect_tear_down_subscriptions() {
        let rooms = ProjectRooms::new();
        let conn = rooms.next_connection_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms.join("p1", conn, tx.clone());
        rooms.join("p2", conn, tx);

        rooms.leave("p1", conn);
        rooms.broadcast("p1", &stats_event());
        assert!(rx.try_recv().is_err());

        rooms.disconnect(conn);
        rooms.broadcast("p2", &stats_event());
        assert!(rx.try_recv().is_err());
        assert_eq!(rooms.subscriber_count("p2"), 0);
    }

    #[test]
    fn dead_subscribers_are_dropped_on_broadcast() {
        let rooms = ProjectRooms::new();
        let conn = rooms.next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.join("p1", conn, tx);
        drop(rx);

        rooms.broadcast("p1", &stats_event());
        assert_eq!(rooms.subscriber_count("p1"), 0);
    }

    #[test]
    fn status_changed_frame_carries_old_and_new_status() {
        let task = TaskBody {
            id: "t1".into(),
            project_id: "p1".into(),
            title: "Write spec".into(),
            description: String::new(),
            status: "done".into(),
            assignee_id: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-02T00:00:00Z".into(),
        };
        let event = ProjectEvent::TaskStatusChanged {
            task,
            old_status: TaskStatus::Todo,
            new_status: TaskStatus::Done,
        };
        let frame: Value = serde_json::from_str(&event.to_frame("p1")).unwrap();
        assert_eq!(frame["event"], "task-status-changed");
        assert_eq!(frame["projectId"], "p1");
        assert_eq!(frame["data"]["oldStatus"], "todo");
        assert_eq!(frame["data"]["newStatus"], "done");
        assert_eq!(frame["data"]["title"], "Write spec");
    }

    #[test]
    fn stats_frame_uses_kebab_case_in_progress_key() {
        let frame: Value = serde_json::from_str(&stats_event().to_frame("p1")).unwrap();
        assert_eq!(frame["event"], "project-stats-updated");
        assert_eq!(frame["data"]["todo"], 1);
        assert_eq!(frame["data"]["in-progress"], 0);
        assert_eq!(frame["data"]["done"], 2);
    }
}
