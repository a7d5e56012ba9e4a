//! Orchestrator: runs a job's catalogue in order with resume and stop-on-failure.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use copyforge_core::{JobId, ProgressSnapshot, TaskCatalogue, TaskId, TaskStatus};
use copyforge_infra::{RetryPolicySource, TaskExecutionStore};

use crate::error::{OrchestratorError, RetryError};
use crate::progress::job_progress;
use crate::retry::{RetryEngine, TaskRun};
use crate::work::WorkMap;

/// What to do when the work map lacks a function for a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingWorkPolicy {
    /// Report an `error` outcome for the task and keep going.
    #[default]
    Skip,
    /// Refuse to start the run.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcomeStatus {
    Completed,
    /// Already completed by an earlier run; work was not invoked.
    Skipped,
    Failed,
    /// No work function was registered for the task.
    Error,
}

/// Per-task entry of a `JobResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_name: String,
    pub status: TaskOutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskOutcome {
    fn new(task_id: &TaskId, task_name: &str, status: TaskOutcomeStatus) -> Self {
        Self {
            task_id: task_id.clone(),
            task_name: task_name.to_string(),
            status,
            result: None,
            error: None,
            reason: None,
        }
    }
}

/// Result of one orchestration run, in catalogue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    /// `true` when the run did not stop on a task failure and no task of the job
    /// is `failed` at the end of it.
    pub success: bool,
    pub progress: ProgressSnapshot,
    pub results: Vec<TaskOutcome>,
}

impl JobResult {
    /// Every catalogue task is `completed`.
    pub fn is_fully_completed(&self) -> bool {
        self.progress.is_finished()
    }

    pub fn outcome(&self, task_name: &str) -> Option<&TaskOutcome> {
        self.results.iter().find(|o| o.task_name == task_name)
    }
}

/// Drives a whole job through the Retry Engine, one task at a time.
///
/// Re-invoking `orchestrate` for the same job resumes from the first task that is
/// not `completed`. Callers must not run two orchestrations of one job at once.
pub struct Orchestrator<S, P> {
    engine: RetryEngine<S, P>,
    catalogue: TaskCatalogue,
    missing_work: MissingWorkPolicy,
}

impl<S, P> Orchestrator<S, P>
where
    S: TaskExecutionStore,
    P: RetryPolicySource,
{
    pub fn new(engine: RetryEngine<S, P>, catalogue: TaskCatalogue) -> Self {
        Self {
            engine,
            catalogue,
            missing_work: MissingWorkPolicy::default(),
        }
    }

    pub fn with_missing_work_policy(mut self, policy: MissingWorkPolicy) -> Self {
        self.missing_work = policy;
        self
    }

    pub fn catalogue(&self) -> &TaskCatalogue {
        &self.catalogue
    }

    pub fn engine(&self) -> &RetryEngine<S, P> {
        &self.engine
    }

    /// Catalogue task names with no entry in `work`, in catalogue order.
    pub fn missing_work(&self, work: &WorkMap) -> Vec<String> {
        self.catalogue
            .iter()
            .filter(|t| !work.contains_key(&t.name))
            .map(|t| t.name.clone())
            .collect()
    }

    pub async fn orchestrate(
        &self,
        job_id: JobId,
        work: &WorkMap,
    ) -> Result<JobResult, OrchestratorError> {
        let missing = self.missing_work(work);
        if !missing.is_empty() {
            match self.missing_work {
                MissingWorkPolicy::Reject => {
                    error!(
                        job_id = %job_id,
                        missing = ?missing,
                        "work map incomplete; refusing to run"
                    );
                    return Err(OrchestratorError::MissingWork {
                        job_id,
                        task_names: missing,
                    });
                }
                MissingWorkPolicy::Skip => {
                    warn!(
                        job_id = %job_id,
                        missing = ?missing,
                        "work map incomplete; affected tasks will be reported as errors"
                    );
                }
            }
        }

        let store = self.engine.store();
        store.initialize(job_id, &self.catalogue).await?;
        let policy = self.engine.load_policy(job_id).await;
        let statuses = store.get_statuses(job_id).await?;

        info!(
            job_id = %job_id,
            tasks = self.catalogue.len(),
            max_attempts = policy.max_attempts,
            "orchestration started"
        );

        let mut results = Vec::with_capacity(self.catalogue.len());
        let mut halted = false;
        for task in &self.catalogue {
            let snapshot = statuses.get(&task.id);

            if snapshot.is_some_and(|s| s.status == TaskStatus::Completed) {
                let mut outcome =
                    TaskOutcome::new(&task.id, &task.name, TaskOutcomeStatus::Skipped);
                outcome.reason = Some("already completed".to_string());
                results.push(outcome);
                continue;
            }

            let Some(task_work) = work.get(&task.name) else {
                let mut outcome = TaskOutcome::new(&task.id, &task.name, TaskOutcomeStatus::Error);
                outcome.error = Some(format!(
                    "no work function registered for task '{}'",
                    task.name
                ));
                results.push(outcome);
                continue;
            };

            let run = TaskRun {
                job_id,
                task_id: &task.id,
                task_name: &task.name,
                prior_attempts: snapshot.map_or(0, |s| s.attempt_count),
            };
            match self.engine.execute_with_policy(&policy, run, task_work).await {
                Ok(value) => {
                    let mut outcome =
                        TaskOutcome::new(&task.id, &task.name, TaskOutcomeStatus::Completed);
                    outcome.result = Some(value);
                    results.push(outcome);
                }
                Err(err) => {
                    if let RetryError::Store(store_err) = &err {
                        error!(
                            job_id = %job_id,
                            task_name = %task.name,
                            error = %store_err,
                            "task state write failed"
                        );
                    }
                    let mut outcome =
                        TaskOutcome::new(&task.id, &task.name, TaskOutcomeStatus::Failed);
                    outcome.error = Some(err.to_string());
                    results.push(outcome);
                    warn!(
                        job_id = %job_id,
                        task_name = %task.name,
                        "stopping job after task failure"
                    );
                    halted = true;
                    break;
                }
            }
        }

        // A failed write can leave the record short of `failed`, so the halt
        // counts on its own.
        let progress = job_progress(store, job_id).await?;
        let success = !halted && progress.failed == 0;
        info!(
            job_id = %job_id,
            success,
            completed = progress.completed,
            total = progress.total,
            percentage = progress.percentage,
            "orchestration finished"
        );

        Ok(JobResult {
            job_id,
            success,
            progress,
            results,
        })
    }
}
