use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

// ─── Task status ─────────────────────────────────────────────────────────────

/// Task workflow status. Stored as TEXT; any status may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(anyhow::anyhow!("unknown task status '{other}'")),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MembershipRow {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub assignee_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership joined with the member's user record, for member listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectMemberRow {
    pub membership_id: String,
    pub user_id: String,
    pub email: String,
    pub user_created_at: String,
    pub user_updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthTokenRow {
    pub token_hash: String,
    pub user_id: String,
    pub created_at: String,
    pub expires_at: String,
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("trackd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                // Project deletion cascades to memberships and tasks.
                .foreign_keys(true)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions as _;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/storage/migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Users ──────────────────────────────────────────────────────────────

    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_user(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user not found after insert"))
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn update_user(&self, id: &str, email: &str, password_hash: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE users SET email = ?, password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(email)
            .bind(password_hash)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Case-insensitive email substring search, excluding `exclude_user_id`.
    pub async fn search_users(
        &self,
        email_substring: &str,
        exclude_user_id: &str,
        limit: i64,
    ) -> Result<Vec<UserRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM users
                 WHERE lower(email) LIKE '%' || lower(?) || '%' AND id != ?
                 ORDER BY email ASC LIMIT ?",
            )
            .bind(email_substring)
            .bind(exclude_user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    // ─── Auth tokens ────────────────────────────────────────────────────────

    pub async fn insert_auth_token(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO auth_tokens (token_hash, user_id, created_at, expires_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(&now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_auth_token(&self, token_hash: &str) -> Result<Option<AuthTokenRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM auth_tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Delete tokens past their expiry. Returns the number removed.
    pub async fn prune_expired_tokens(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ─── Projects ───────────────────────────────────────────────────────────

    pub async fn create_project(&self, name: &str, owner_id: &str) -> Result<ProjectRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO projects (id, name, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(owner_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_project(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("project not found after insert"))
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        Ok(sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// All projects the user owns or is a member of, most recently updated first.
    pub async fn list_projects_for_user(&self, user_id: &str) -> Result<Vec<ProjectRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM projects
                 WHERE owner_id = ?
                    OR id IN (SELECT project_id FROM memberships WHERE user_id = ?)
                 ORDER BY updated_at DESC",
            )
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn rename_project(&self, id: &str, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE projects SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Memberships and tasks go with the project via FK cascade.
    pub async fn delete_project(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_tasks(&self, project_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // ─── Memberships ────────────────────────────────────────────────────────

    pub async fn create_membership(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<MembershipRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO memberships (id, project_id, user_id, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(MembershipRow {
            id,
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
        })
    }

    pub async fn find_membership(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<Option<MembershipRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM memberships WHERE project_id = ? AND user_id = ?")
                .bind(project_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Fetch a membership by id, scoped to a project — an id valid in another
    /// project is treated as absent.
    pub async fn get_membership_in_project(
        &self,
        membership_id: &str,
        project_id: &str,
    ) -> Result<Option<MembershipRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM memberships WHERE id = ? AND project_id = ?")
                .bind(membership_id)
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMemberRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT m.id AS membership_id, u.id AS user_id, u.email,
                        u.created_at AS user_created_at, u.updated_at AS user_updated_at
                 FROM memberships m JOIN users u ON u.id = m.user_id
                 WHERE m.project_id = ?
                 ORDER BY m.created_at ASC",
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn delete_membership(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM memberships WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub async fn create_task(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
        status: TaskStatus,
        assignee_id: Option<&str>,
    ) -> Result<TaskRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO tasks (id, project_id, title, description, status, assignee_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(title)
        .bind(description)
        .bind(status.as_str())
        .bind(assignee_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_task(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task not found after insert"))
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Fetch a task by id, scoped to a project — an id valid in another
    /// project is treated as absent.
    pub async fn get_task_in_project(
        &self,
        task_id: &str,
        project_id: &str,
    ) -> Result<Option<TaskRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM tasks WHERE id = ? AND project_id = ?")
                .bind(task_id)
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM tasks WHERE project_id = ? ORDER BY updated_at DESC",
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Write the merged field values of a partial update. Callers resolve
    /// omitted fields against the existing row first.
    pub async fn update_task(
        &self,
        id: &str,
        title: &str,
        description: &str,
        status: TaskStatus,
        assignee_id: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, status = ?, assignee_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(status.as_str())
        .bind(assignee_id)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Task counts grouped by status. Statuses with no tasks are absent here;
    /// the stats aggregator zero-fills them.
    pub async fn count_tasks_by_status(&self, project_id: &str) -> Result<Vec<(String, i64)>> {
        Ok(sqlx::query_as(
            "SELECT status, COUNT(*) FROM tasks WHERE project_id = ? GROUP BY status",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ─── Maintenance ────────────────────────────────────────────────────────

    /// Run SQLite VACUUM to reclaim disk space after pruning.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[test]
    fn task_status_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("blocked".parse::<TaskStatus>().is_err());
        assert!("".parse::<TaskStatus>().is_err());
    }

    #[tokio::test]
    async fn project_delete_cascades_to_tasks_and_memberships() {
        let (_dir, storage) = make_storage().await;
        let owner = storage.create_user("owner@example.com", "h").await.unwrap();
        let member = storage.create_user("member@example.com", "h").await.unwrap();
        let project = storage.create_project("Sprint1", &owner.id).await.unwrap();
        let membership = storage
            .create_membership(&project.id, &member.id)
            .await
            .unwrap();
        let task = storage
            .create_task(&project.id, "Write spec", "", TaskStatus::Todo, None)
            .await
            .unwrap();

        storage.delete_project(&project.id).await.unwrap();

        assert!(storage.get_task(&task.id).await.unwrap().is_none());
        assert!(storage
            .get_membership_in_project(&membership.id, &project.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_membership_rejected_by_unique_index() {
        let (_dir, storage) = make_storage().await;
        let owner = storage.create_user("o@example.com", "h").await.unwrap();
        let member = storage.create_user("m@example.com", "h").await.unwrap();
        let project = storage.create_project("P", &owner.id).await.unwrap();
        storage
            .create_membership(&project.id, &member.id)
            .await
            .unwrap();
        assert!(storage
            .create_membership(&project.id, &member.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn scoped_task_lookup_hides_other_projects() {
        let (_dir, storage) = make_storage().await;
        let owner = storage.create_user("o@example.com", "h").await.unwrap();
        let p1 = storage.create_project("P1", &owner.id).await.unwrap();
        let p2 = storage.create_project("P2", &owner.id).await.unwrap();
        let task = storage
            .create_task(&p1.id, "t", "", TaskStatus::Todo, None)
            .await
            .unwrap();

        assert!(storage
            .get_task_in_project(&task.id, &p1.id)
            .await
            .unwrap()
            .is_some());
        assert!(storage
            .get_task_in_project(&task.id, &p2.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn user_search_is_case_insensitive_and_excludes_self() {
        let (_dir, storage) = make_storage().await;
        let me = storage.create_user("Alice@Example.com", "h").await.unwrap();
        storage.create_user("alina@example.com", "h").await.unwrap();
        storage.create_user("bob@other.org", "h").await.unwrap();

        let hits = storage.search_users("ALI", &me.id, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].email, "alina@example.com");
    }
}
