//! Postgres-backed task execution store.
//!
//! Records live in the `task_executions` table keyed by `(job_id, task_id)`
//! (see `migrations/0001_task_executions.sql`).
//!
//! ## Error Mapping
//!
//! | SQLx Error | TaskStoreError |
//! |------------|----------------|
//! | Database / PoolClosed / other | `Storage` |
//! | Unknown status text in a row | `Storage` |
//! | `UPDATE` touching no row | `NotFound` |
//! | Transition rejected by `TaskStatus::can_transition_to` | `InvalidTransition` |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use copyforge_core::{
    JobId, TaskCatalogue, TaskExecutionRecord, TaskId, TaskSnapshot, TaskStatus,
};

use super::r#trait::{TaskExecutionStore, TaskStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_task_executions.sql");

/// Postgres-backed task execution store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
///
/// ## Transitions
///
/// `set_status` reads the current row `FOR UPDATE` inside a transaction, checks the
/// transition with the same rule the in-memory store uses, then writes. A completed
/// record therefore cannot be regressed even by a stale writer.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: Arc<PgPool>,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `task_executions` and `retry_policies` tables if they are missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), TaskStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl TaskExecutionStore for PostgresTaskStore {
    #[instrument(skip(self, catalogue), fields(job_id = %job_id, tasks = catalogue.len()), err)]
    async fn initialize(
        &self,
        job_id: JobId,
        catalogue: &TaskCatalogue,
    ) -> Result<(), TaskStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for definition in catalogue {
            sqlx::query(
                r#"
                INSERT INTO task_executions (job_id, task_id, task_name, status, attempt_count)
                VALUES ($1, $2, $3, 'pending', 0)
                ON CONFLICT (job_id, task_id) DO NOTHING
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(definition.id.as_str())
            .bind(&definition.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("initialize", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_statuses(
        &self,
        job_id: JobId,
    ) -> Result<BTreeMap<TaskId, TaskSnapshot>, TaskStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, status, attempt_count
            FROM task_executions
            WHERE job_id = $1
            ORDER BY task_id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_statuses", e))?;

        let mut statuses = BTreeMap::new();
        for row in rows {
            let task_id: String = row
                .try_get("task_id")
                .map_err(|e| map_sqlx_error("get_statuses", e))?;
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("get_statuses", e))?;
            let attempt_count: i32 = row
                .try_get("attempt_count")
                .map_err(|e| map_sqlx_error("get_statuses", e))?;

            statuses.insert(
                parse_task_id(task_id)?,
                TaskSnapshot {
                    status: parse_status(&status)?,
                    attempt_count: attempt_count.max(0) as u32,
                },
            );
        }
        Ok(statuses)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_records(&self, job_id: JobId) -> Result<Vec<TaskExecutionRecord>, TaskStoreError> {
        let rows = sqlx::query_as::<_, TaskExecutionRow>(
            r#"
            SELECT
                job_id,
                task_id,
                task_name,
                status,
                attempt_count,
                last_attempt_at,
                completed_at,
                error_message
            FROM task_executions
            WHERE job_id = $1
            ORDER BY task_id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_records", e))?;

        rows.into_iter().map(TaskExecutionRecord::try_from).collect()
    }

    #[instrument(
        skip(self, error_message),
        fields(job_id = %job_id, task_id = %task_id, status = %status),
        err
    )]
    async fn set_status(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), TaskStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status
            FROM task_executions
            WHERE job_id = $1 AND task_id = $2
            FOR UPDATE
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(task_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_status", e))?;

        let current = match current {
            Some(s) => parse_status(&s)?,
            None => {
                return Err(TaskStoreError::NotFound {
                    job_id,
                    task_id: task_id.clone(),
                });
            }
        };
        current.check_transition(status)?;

        sqlx::query(
            r#"
            UPDATE task_executions
            SET
                status = $3,
                completed_at = CASE WHEN $3 = 'completed' THEN NOW() ELSE completed_at END,
                error_message = CASE
                    WHEN $3 = 'completed' THEN NULL
                    WHEN $3 = 'failed' THEN $4
                    ELSE COALESCE($4, error_message)
                END,
                updated_at = NOW()
            WHERE job_id = $1 AND task_id = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(task_id.as_str())
        .bind(status.as_str())
        .bind(error_message)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_status", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id, task_id = %task_id), err)]
    async fn record_attempt(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        attempt_count: u32,
    ) -> Result<(), TaskStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE task_executions
            SET
                attempt_count = GREATEST(attempt_count, $3),
                last_attempt_at = NOW(),
                updated_at = NOW()
            WHERE job_id = $1 AND task_id = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(task_id.as_str())
        .bind(attempt_count as i32)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_attempt", e))?;

        if result.rows_affected() == 0 {
            return Err(TaskStoreError::NotFound {
                job_id,
                task_id: task_id.clone(),
            });
        }
        Ok(())
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, TaskStoreError> {
    s.parse::<TaskStatus>()
        .map_err(|e| TaskStoreError::Storage(format!("corrupt status column: {e}")))
}

fn parse_task_id(s: String) -> Result<TaskId, TaskStoreError> {
    TaskId::new(s).map_err(|e| TaskStoreError::Storage(format!("corrupt task_id column: {e}")))
}

/// Map SQLx errors to TaskStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TaskStoreError {
    match err {
        sqlx::Error::Database(db_err) => TaskStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            TaskStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => TaskStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct TaskExecutionRow {
    job_id: uuid::Uuid,
    task_id: String,
    task_name: String,
    status: String,
    attempt_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TaskExecutionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TaskExecutionRow {
            job_id: row.try_get("job_id")?,
            task_id: row.try_get("task_id")?,
            task_name: row.try_get("task_name")?,
            status: row.try_get("status")?,
            attempt_count: row.try_get("attempt_count")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

impl TryFrom<TaskExecutionRow> for TaskExecutionRecord {
    type Error = TaskStoreError;

    fn try_from(row: TaskExecutionRow) -> Result<Self, Self::Error> {
        Ok(TaskExecutionRecord {
            job_id: JobId::from_uuid(row.job_id),
            task_id: parse_task_id(row.task_id)?,
            task_name: row.task_name,
            status: parse_status(&row.status)?,
            attempt_count: row.attempt_count.max(0) as u32,
            last_attempt_at: row.last_attempt_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}
