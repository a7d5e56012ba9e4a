//! Progress Reporter: read-only projection over the execution store.

use tracing::instrument;

use copyforge_core::{JobId, ProgressSnapshot};
use copyforge_infra::{TaskExecutionStore, TaskStoreError};

/// Compute a job's progress from its current records.
///
/// A job with no records yields zero counts. Store failures are returned to the
/// caller rather than reported as an empty job.
pub async fn job_progress<S>(store: &S, job_id: JobId) -> Result<ProgressSnapshot, TaskStoreError>
where
    S: TaskExecutionStore + ?Sized,
{
    let statuses = store.get_statuses(job_id).await?;
    Ok(ProgressSnapshot::from_snapshots(statuses.values()))
}

/// Polling-friendly handle over a task execution store.
///
/// Holds no cache; every call observes a fresh point-in-time snapshot, so it is
/// safe to poll while an orchestration run for the same job is in flight.
#[derive(Debug, Clone)]
pub struct ProgressReporter<S> {
    store: S,
}

impl<S> ProgressReporter<S>
where
    S: TaskExecutionStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), err)]
    pub async fn progress(&self, job_id: JobId) -> Result<ProgressSnapshot, TaskStoreError> {
        job_progress(&self.store, job_id).await
    }
}
