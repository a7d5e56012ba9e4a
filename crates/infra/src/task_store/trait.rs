use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use copyforge_core::{
    DomainError, JobId, TaskCatalogue, TaskExecutionRecord, TaskId, TaskSnapshot, TaskStatus,
};

/// Task execution store operation error.
///
/// These are **infrastructure errors** (storage, missing rows, rejected writes) as
/// opposed to work-function failures, which the retry engine handles itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskStoreError {
    #[error("no execution record for job {job_id}, task {task_id}")]
    NotFound { job_id: JobId, task_id: TaskId },

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for TaskStoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvariantViolation(msg) => TaskStoreError::InvalidTransition(msg),
            other => TaskStoreError::Storage(other.to_string()),
        }
    }
}

/// Durable keyed store of `TaskExecutionRecord`s, one per `(job_id, task_id)`.
///
/// Any backend that supports point reads, point writes and "insert if absent" can
/// implement this.
///
/// ## Semantics
///
/// - `initialize` is an upsert that ignores existing rows: calling it repeatedly
///   never duplicates or resets records.
/// - `get_statuses` returns an empty map for an unknown job; it never reports
///   "not found".
/// - `set_status` enforces `TaskStatus::can_transition_to`; `completed` also stamps
///   `completed_at`. Write failures propagate.
/// - `record_attempt` stamps `attempt_count` (never lowering it) and `last_attempt_at`.
/// - Records are never deleted through this interface.
#[async_trait]
pub trait TaskExecutionStore: Send + Sync {
    /// Create a `pending` record for every catalogue entry that has none yet.
    async fn initialize(&self, job_id: JobId, catalogue: &TaskCatalogue)
    -> Result<(), TaskStoreError>;

    /// Point-in-time status of every record of a job, ordered by task id.
    async fn get_statuses(
        &self,
        job_id: JobId,
    ) -> Result<BTreeMap<TaskId, TaskSnapshot>, TaskStoreError>;

    /// Full records of a job, ordered by task id.
    async fn get_records(&self, job_id: JobId) -> Result<Vec<TaskExecutionRecord>, TaskStoreError>;

    async fn set_status(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), TaskStoreError>;

    async fn record_attempt(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        attempt_count: u32,
    ) -> Result<(), TaskStoreError>;
}

#[async_trait]
impl<S> TaskExecutionStore for Arc<S>
where
    S: TaskExecutionStore + ?Sized,
{
    async fn initialize(
        &self,
        job_id: JobId,
        catalogue: &TaskCatalogue,
    ) -> Result<(), TaskStoreError> {
        (**self).initialize(job_id, catalogue).await
    }

    async fn get_statuses(
        &self,
        job_id: JobId,
    ) -> Result<BTreeMap<TaskId, TaskSnapshot>, TaskStoreError> {
        (**self).get_statuses(job_id).await
    }

    async fn get_records(&self, job_id: JobId) -> Result<Vec<TaskExecutionRecord>, TaskStoreError> {
        (**self).get_records(job_id).await
    }

    async fn set_status(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), TaskStoreError> {
        (**self)
            .set_status(job_id, task_id, status, error_message)
            .await
    }

    async fn record_attempt(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        attempt_count: u32,
    ) -> Result<(), TaskStoreError> {
        (**self).record_attempt(job_id, task_id, attempt_count).await
    }
}
