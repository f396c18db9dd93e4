use anyhow::Context;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::core::model::{TaskState, TaskStatus};

/// Local task history. One row per task id, updated on every observation, so
/// `history` and `resume` work across invocations without asking the backend.
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub state: TaskState,
    pub percent: f64,
    pub description: Option<String>,
    pub updated_at: String,
}

impl TaskStore {
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create_dir_all {}", parent.display()))?;
            }
        }

        let abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()
                .with_context(|| "current_dir")?
                .join(db_path)
        };

        let mut p = abs.to_string_lossy().to_string();
        if cfg!(windows) {
            p = p.replace('\\', "/");
        }

        // mode=rwc so a missing file is created instead of erroring.
        let db_url = if p.starts_with('/') {
            format!("sqlite://{}?mode=rwc", p)
        } else {
            format!("sqlite:///{}?mode=rwc", p)
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .with_context(|| format!("open sqlite {}", db_url))?;

        Self::init(&pool).await?;
        Ok(Self { pool })
    }

    /// Each connection to `sqlite::memory:` is its own database, so the pool
    /// is pinned to one connection.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory sqlite")?;
        Self::init(&pool).await?;
        Ok(Self { pool })
    }

    async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id     TEXT PRIMARY KEY,
                url         TEXT,
                title       TEXT,
                state       TEXT NOT NULL DEFAULT 'unknown',
                percent     REAL NOT NULL DEFAULT 0,
                description TEXT,
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await
        .context("create tasks table")?;
        Ok(())
    }

    pub async fn record_started(
        &self,
        task_id: &str,
        url: Option<&str>,
        title: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, url, title, state, updated_at)
            VALUES (?1, ?2, ?3, 'pending', datetime('now'))
            ON CONFLICT(task_id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                updated_at = datetime('now')
            "#,
        )
        .bind(task_id)
        .bind(url)
        .bind(title)
        .execute(&self.pool)
        .await
        .context("record task start")?;
        Ok(())
    }

    pub async fn record_status(&self, status: &TaskStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, state, percent, description, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(task_id) DO UPDATE SET
                state = excluded.state,
                percent = excluded.percent,
                description = excluded.description,
                updated_at = datetime('now')
            "#,
        )
        .bind(&status.task_id)
        .bind(status.state.as_str())
        .bind(status.clamped_percent())
        .bind(&status.description)
        .execute(&self.pool)
        .await
        .context("record task status")?;
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> anyhow::Result<Option<TaskRecord>> {
        let row = sqlx::query(
            "SELECT task_id, url, title, state, percent, description, updated_at
             FROM tasks WHERE task_id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("load task")?;
        Ok(row.map(Self::map_row))
    }

    pub async fn recent(&self, limit: i64) -> anyhow::Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_id, url, title, state, percent, description, updated_at
             FROM tasks ORDER BY updated_at DESC, rowid DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("load recent tasks")?;
        Ok(rows.into_iter().map(Self::map_row).collect())
    }

    /// Tasks that never reached a terminal state, newest first. What `resume`
    /// picks from.
    pub async fn unfinished(&self) -> anyhow::Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_id, url, title, state, percent, description, updated_at
             FROM tasks
             WHERE state NOT IN ('completed', 'error', 'canceled')
             ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("load unfinished tasks")?;
        Ok(rows.into_iter().map(Self::map_row).collect())
    }

    fn map_row(row: sqlx::sqlite::SqliteRow) -> TaskRecord {
        let state: String = row.get("state");
        TaskRecord {
            task_id: row.get("task_id"),
            url: row.get("url"),
            title: row.get("title"),
            state: TaskState::parse(&state),
            percent: row.get("percent"),
            description: row.get("description"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_merge_start_and_status() {
        let store = TaskStore::open_in_memory().await.unwrap();
        store
            .record_started("t1", Some("https://example.com/v"), Some("A video"))
            .await
            .unwrap();

        let mut status = TaskStatus::new("t1", TaskState::Downloading, 37.0);
        status.description = Some("fragment 2/8".to_string());
        store.record_status(&status).await.unwrap();

        let rec = store.get("t1").await.unwrap().expect("record exists");
        assert_eq!(rec.url.as_deref(), Some("https://example.com/v"));
        assert_eq!(rec.title.as_deref(), Some("A video"));
        assert_eq!(rec.state, TaskState::Downloading);
        assert_eq!(rec.percent, 37.0);
        assert_eq!(rec.description.as_deref(), Some("fragment 2/8"));
    }

    #[tokio::test]
    async fn status_alone_creates_a_row() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let status = TaskStatus::new("t2", TaskState::Processing, 90.0);
        store.record_status(&status).await.unwrap();

        let rec = store.get("t2").await.unwrap().expect("record exists");
        assert!(rec.url.is_none());
        assert_eq!(rec.state, TaskState::Processing);
    }

    #[tokio::test]
    async fn recent_respects_limit_and_order() {
        let store = TaskStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            let status = TaskStatus::new(format!("t{}", i), TaskState::Pending, 0.0);
            store.record_status(&status).await.unwrap();
        }

        let recent = store.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        // Newest insert first.
        assert_eq!(recent[0].task_id, "t4");
    }

    #[tokio::test]
    async fn unfinished_excludes_terminal_states() {
        let store = TaskStore::open_in_memory().await.unwrap();
        store
            .record_status(&TaskStatus::new("a", TaskState::Completed, 100.0))
            .await
            .unwrap();
        store
            .record_status(&TaskStatus::new("b", TaskState::Downloading, 50.0))
            .await
            .unwrap();
        store
            .record_status(&TaskStatus::new("c", TaskState::Error, 0.0))
            .await
            .unwrap();
        store
            .record_status(&TaskStatus::new("d", TaskState::Canceled, 10.0))
            .await
            .unwrap();

        let unfinished = store.unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].task_id, "b");
    }
}
