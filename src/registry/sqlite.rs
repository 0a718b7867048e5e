//! Durable task store over pooled SQLite.
//!
//! Same contract as the in-memory store; survives restarts. Transitions are
//! enforced with conditional UPDATEs so a stale writer can never revert a
//! terminal row. JSON columns carry the config/result payloads verbatim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::store::{StoreError, TaskStore};
use crate::storage::Pool;
use crate::task::{
    AnalysisResult, ExecutionResult, TaskState, TaskStatus, TaskSummary, TestConfig,
};

pub struct SqliteStore {
    pool: Pool,
    retention: usize,
}

impl SqliteStore {
    pub fn new(pool: Pool, retention: usize) -> Self {
        Self {
            pool,
            retention: retention.max(1),
        }
    }

    fn current_state(conn: &rusqlite::Connection, task_id: &str) -> Result<TaskState, StoreError> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?;
        match status {
            Some(s) => s
                .parse::<TaskState>()
                .map_err(|e| StoreError::Backend(anyhow::anyhow!(e))),
            None => Err(StoreError::NotFound(task_id.to_string())),
        }
    }

    /// Drop the oldest terminal rows beyond the retention cap.
    /// Results/analyses follow via ON DELETE CASCADE.
    fn evict(conn: &rusqlite::Connection, retention: usize) -> Result<(), StoreError> {
        let terminal: usize = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE status IN ('completed','failed')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        if terminal <= retention {
            return Ok(());
        }
        let excess = terminal - retention;
        let dropped = conn
            .execute(
                "DELETE FROM tasks WHERE task_id IN (
                    SELECT task_id FROM tasks
                    WHERE status IN ('completed','failed')
                    ORDER BY COALESCE(end_time, created_at) ASC, rowid ASC
                    LIMIT ?1
                )",
                params![excess],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        debug!(dropped, "evicted terminal tasks beyond retention cap");
        Ok(())
    }

    fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
        raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    fn row_to_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStatus> {
        Ok(RawStatus {
            task_id: row.get(0)?,
            status: row.get(1)?,
            progress: row.get(2)?,
            error: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
        })
    }
}

struct RawStatus {
    task_id: String,
    status: String,
    progress: Option<String>,
    error: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

impl RawStatus {
    fn into_status(self) -> Result<TaskStatus, StoreError> {
        Ok(TaskStatus {
            task_id: self.task_id,
            status: self
                .status
                .parse::<TaskState>()
                .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?,
            progress: self.progress,
            error: self.error,
            start_time: SqliteStore::parse_time(self.start_time),
            end_time: SqliteStore::parse_time(self.end_time),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, status: TaskStatus, config: TestConfig) -> Result<(), StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let config_json =
            serde_json::to_string(&config).map_err(|e| StoreError::Backend(e.into()))?;
        let res = conn.execute(
            "INSERT INTO tasks (task_id, status, progress, error, start_time, end_time, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                status.task_id,
                status.status.to_string(),
                status.progress,
                status.error,
                status.start_time.map(|t| t.to_rfc3339()),
                status.end_time.map(|t| t.to_rfc3339()),
                config_json,
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(status.task_id))
            }
            Err(e) => Err(StoreError::Backend(e.into())),
        }
    }

    async fn get_status(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let raw = conn
            .query_row(
                "SELECT task_id, status, progress, error, start_time, end_time
                 FROM tasks WHERE task_id = ?1",
                params![task_id],
                Self::row_to_status,
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        raw.into_status()
    }

    async fn get_config(&self, task_id: &str) -> Result<TestConfig, StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT config_json FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?;
        match raw {
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Backend(e.into())),
            None => Err(StoreError::NotFound(task_id.to_string())),
        }
    }

    async fn mark_running(&self, task_id: &str) -> Result<(), StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let n = conn
            .execute(
                "UPDATE tasks SET status = 'running', progress = 'initializing browser agent'
                 WHERE task_id = ?1 AND status = 'queued'",
                params![task_id],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        if n == 0 {
            let from = Self::current_state(&conn, task_id)?;
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to: TaskState::Running,
            });
        }
        Ok(())
    }

    async fn set_progress(&self, task_id: &str, progress: &str) -> Result<(), StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let n = conn
            .execute(
                "UPDATE tasks SET progress = ?1
                 WHERE task_id = ?2 AND status IN ('queued','running')",
                params![progress, task_id],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        if n == 0 {
            // distinguish a missing task from a late write against a terminal one
            Self::current_state(&conn, task_id)?;
            debug!(%task_id, "progress update after terminal state, ignored");
        }
        Ok(())
    }

    async fn complete(&self, task_id: &str, result: ExecutionResult) -> Result<(), StoreError> {
        let mut conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let result_json =
            serde_json::to_string(&result).map_err(|e| StoreError::Backend(e.into()))?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(e.into()))?;
        let n = tx
            .execute(
                "UPDATE tasks SET status = 'completed', end_time = ?1
                 WHERE task_id = ?2 AND status = 'running'",
                params![result.timestamp.to_rfc3339(), task_id],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        if n == 0 {
            let from = Self::current_state(&tx, task_id)?;
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to: TaskState::Completed,
            });
        }
        tx.execute(
            "INSERT INTO results (task_id, result_json) VALUES (?1, ?2)",
            params![task_id, result_json],
        )
        .map_err(|e| StoreError::Backend(e.into()))?;
        Self::evict(&tx, self.retention)?;
        tx.commit().map_err(|e| StoreError::Backend(e.into()))
    }

    async fn fail(&self, task_id: &str, error: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(e.into()))?;
        let n = tx
            .execute(
                "UPDATE tasks SET status = 'failed', error = ?1, end_time = ?2
                 WHERE task_id = ?3 AND status IN ('queued','running')",
                params![error, Utc::now().to_rfc3339(), task_id],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        if n == 0 {
            let from = Self::current_state(&tx, task_id)?;
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to: TaskState::Failed,
            });
        }
        Self::evict(&tx, self.retention)?;
        tx.commit().map_err(|e| StoreError::Backend(e.into()))
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<ExecutionResult>, StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        // surface NotFound for unknown ids before peeking at results
        Self::current_state(&conn, task_id)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT result_json FROM results WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Backend(e.into())),
            None => Ok(None),
        }
    }

    async fn get_analysis(&self, task_id: &str) -> Result<Option<AnalysisResult>, StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        Self::current_state(&conn, task_id)?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT analysis_content, created_at FROM analyses WHERE task_id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(row.map(|(content, created)| AnalysisResult {
            task_id: task_id.to_string(),
            analysis_content: content,
            timestamp: Self::parse_time(Some(created)).unwrap_or_else(Utc::now),
        }))
    }

    async fn put_analysis(&self, analysis: AnalysisResult) -> Result<(), StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        Self::current_state(&conn, &analysis.task_id)?;
        conn.execute(
            "INSERT INTO analyses (task_id, analysis_content, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                analysis_content = excluded.analysis_content,
                created_at = excluded.created_at",
            params![
                analysis.task_id,
                analysis.analysis_content,
                analysis.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TaskSummary>, StoreError> {
        let conn = self.pool.get().map_err(|e| StoreError::Backend(e.into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT task_id, status, start_time, end_time
                 FROM tasks ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|e| StoreError::Backend(e.into()))?;

        let mut out = Vec::new();
        for r in rows {
            let (task_id, status, start, end) = r.map_err(|e| StoreError::Backend(e.into()))?;
            out.push(TaskSummary {
                task_id,
                status: status
                    .parse::<TaskState>()
                    .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?,
                start_time: Self::parse_time(start),
                end_time: Self::parse_time(end),
            });
        }
        Ok(out)
    }
}
