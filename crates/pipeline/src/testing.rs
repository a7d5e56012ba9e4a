//! Shared fixtures for the pipeline's unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use copyforge_core::{
    JobId, TaskCatalogue, TaskDefinition, TaskExecutionRecord, TaskId, TaskSnapshot, TaskStatus,
};
use copyforge_infra::{InMemoryTaskStore, TaskExecutionStore, TaskStoreError};

use crate::work::{WorkFn, work_fn};

/// Catalogue with ids "01", "02", ... in the given name order.
pub fn catalogue(names: &[&str]) -> TaskCatalogue {
    let tasks = names
        .iter()
        .enumerate()
        .map(|(i, name)| TaskDefinition::new(format!("{:02}", i + 1), *name, "").unwrap())
        .collect();
    TaskCatalogue::new(tasks).unwrap()
}

pub fn task_id(id: &str) -> TaskId {
    TaskId::new(id).unwrap()
}

pub async fn record<S>(store: &S, job_id: JobId, id: &str) -> TaskExecutionRecord
where
    S: TaskExecutionStore + ?Sized,
{
    store
        .get_records(job_id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.task_id.as_str() == id)
        .unwrap()
}

/// Scripted unit of work that counts its invocations.
#[derive(Clone)]
pub struct WorkProbe {
    calls: Arc<AtomicU32>,
    failures: u32,
    value: JsonValue,
    error: Arc<dyn Fn() -> anyhow::Error + Send + Sync>,
}

impl WorkProbe {
    pub fn succeeding(value: JsonValue) -> Self {
        Self::failing_then_ok(0, value)
    }

    pub fn failing(error: impl Fn() -> anyhow::Error + Send + Sync + 'static) -> Self {
        Self {
            calls: Arc::default(),
            failures: u32::MAX,
            value: JsonValue::Null,
            error: Arc::new(error),
        }
    }

    pub fn failing_then_ok(failures: u32, value: JsonValue) -> Self {
        Self {
            calls: Arc::default(),
            failures,
            value,
            error: Arc::new(|| anyhow::anyhow!("transient provider error")),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn work(&self) -> WorkFn {
        let probe = self.clone();
        work_fn(move || {
            let probe = probe.clone();
            async move {
                let call = probe.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= probe.failures {
                    Err((probe.error)())
                } else {
                    Ok(probe.value.clone())
                }
            }
        })
    }
}

/// In-memory store whose writes and reads can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryTaskStore,
    fail_attempts: AtomicBool,
    fail_terminal_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryTaskStore {
        &self.inner
    }

    pub fn fail_attempt_writes(&self, fail: bool) {
        self.fail_attempts.store(fail, Ordering::SeqCst);
    }

    /// Fail writes that move a task to `completed` or `failed`.
    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_terminal_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), TaskStoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TaskStoreError::Storage("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutionStore for FlakyStore {
    async fn initialize(
        &self,
        job_id: JobId,
        catalogue: &TaskCatalogue,
    ) -> Result<(), TaskStoreError> {
        self.inner.initialize(job_id, catalogue).await
    }

    async fn get_statuses(
        &self,
        job_id: JobId,
    ) -> Result<BTreeMap<TaskId, TaskSnapshot>, TaskStoreError> {
        self.check_reads()?;
        self.inner.get_statuses(job_id).await
    }

    async fn get_records(&self, job_id: JobId) -> Result<Vec<TaskExecutionRecord>, TaskStoreError> {
        self.check_reads()?;
        self.inner.get_records(job_id).await
    }

    async fn set_status(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), TaskStoreError> {
        if status.is_terminal() && self.fail_terminal_writes.load(Ordering::SeqCst) {
            return Err(TaskStoreError::Storage("write timed out".into()));
        }
        self.inner
            .set_status(job_id, task_id, status, error_message)
            .await
    }

    async fn record_attempt(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        attempt_count: u32,
    ) -> Result<(), TaskStoreError> {
        if self.fail_attempts.load(Ordering::SeqCst) {
            return Err(TaskStoreError::Storage("write timed out".into()));
        }
        self.inner.record_attempt(job_id, task_id, attempt_count).await
    }
}
