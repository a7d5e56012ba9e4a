use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use copyforge_core::{
    JobId, TaskCatalogue, TaskExecutionRecord, TaskId, TaskSnapshot, TaskStatus,
};

use super::r#trait::{TaskExecutionStore, TaskStoreError};

/// In-memory task execution store.
///
/// Intended for tests/dev and single-process deployments that do not need
/// durability across restarts.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    jobs: RwLock<HashMap<JobId, BTreeMap<TaskId, TaskExecutionRecord>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> TaskStoreError {
        TaskStoreError::Storage("lock poisoned".to_string())
    }

    fn with_record<T>(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        f: impl FnOnce(&mut TaskExecutionRecord) -> Result<T, TaskStoreError>,
    ) -> Result<T, TaskStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let record = jobs
            .get_mut(&job_id)
            .and_then(|tasks| tasks.get_mut(task_id))
            .ok_or_else(|| TaskStoreError::NotFound {
                job_id,
                task_id: task_id.clone(),
            })?;
        f(record)
    }
}

#[async_trait]
impl TaskExecutionStore for InMemoryTaskStore {
    async fn initialize(
        &self,
        job_id: JobId,
        catalogue: &TaskCatalogue,
    ) -> Result<(), TaskStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let tasks = jobs.entry(job_id).or_default();
        for definition in catalogue {
            tasks
                .entry(definition.id.clone())
                .or_insert_with(|| TaskExecutionRecord::pending(job_id, definition));
        }
        Ok(())
    }

    async fn get_statuses(
        &self,
        job_id: JobId,
    ) -> Result<BTreeMap<TaskId, TaskSnapshot>, TaskStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs
            .get(&job_id)
            .map(|tasks| {
                tasks
                    .iter()
                    .map(|(id, record)| (id.clone(), record.snapshot()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_records(&self, job_id: JobId) -> Result<Vec<TaskExecutionRecord>, TaskStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs
            .get(&job_id)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_status(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), TaskStoreError> {
        self.with_record(job_id, task_id, |record| {
            record
                .transition(status, error_message.map(str::to_owned), Utc::now())
                .map_err(TaskStoreError::from)
        })
    }

    async fn record_attempt(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        attempt_count: u32,
    ) -> Result<(), TaskStoreError> {
        self.with_record(job_id, task_id, |record| {
            record.record_attempt(attempt_count, Utc::now());
            Ok(())
        })
    }
}
