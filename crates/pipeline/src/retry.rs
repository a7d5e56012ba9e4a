//! Retry engine: drives one task through up to `max_attempts` attempts.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use copyforge_core::{AttemptBookkeeping, JobId, RetryPolicy, TaskId, TaskStatus};
use copyforge_infra::{RetryPolicySource, TaskExecutionStore};

use crate::classify::{ErrorClass, ErrorClassifier, ProviderErrorClassifier};
use crate::error::RetryError;
use crate::work::WorkFn;

/// Identity of the task a retry loop is running for.
#[derive(Debug, Clone, Copy)]
pub struct TaskRun<'a> {
    pub job_id: JobId,
    pub task_id: &'a TaskId,
    pub task_name: &'a str,
    /// Attempts already persisted for this task by earlier runs of the job.
    pub prior_attempts: u32,
}

/// Executes units of work with escalating delays, persisting every status change.
///
/// On return the task record is `completed` (on `Ok`) or `failed` (on `Err`),
/// unless the store itself failed. The inter-attempt delay is a timer, so other
/// jobs sharing the runtime keep running while a task waits.
pub struct RetryEngine<S, P> {
    store: S,
    policies: P,
    classifier: Arc<dyn ErrorClassifier>,
    fallback_policy: RetryPolicy,
    bookkeeping: AttemptBookkeeping,
}

impl<S, P> RetryEngine<S, P>
where
    S: TaskExecutionStore,
    P: RetryPolicySource,
{
    pub fn new(store: S, policies: P) -> Self {
        Self {
            store,
            policies,
            classifier: Arc::new(ProviderErrorClassifier),
            fallback_policy: RetryPolicy::default(),
            bookkeeping: AttemptBookkeeping::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Policy used when the policy source cannot be read.
    pub fn with_fallback_policy(mut self, policy: RetryPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn with_attempt_bookkeeping(mut self, bookkeeping: AttemptBookkeeping) -> Self {
        self.bookkeeping = bookkeeping;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the job's policy, falling back to the configured default on error.
    pub async fn load_policy(&self, job_id: JobId) -> RetryPolicy {
        match self.policies.load(job_id).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "retry policy unavailable; using fallback");
                self.fallback_policy.clone()
            }
        }
    }

    /// Run `work` for one task, loading the job's retry policy first.
    pub async fn execute_with_retry(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        task_name: &str,
        work: &WorkFn,
    ) -> Result<JsonValue, RetryError> {
        let policy = self.load_policy(job_id).await;
        let prior_attempts = self
            .store
            .get_statuses(job_id)
            .await?
            .get(task_id)
            .map(|s| s.attempt_count)
            .unwrap_or(0);

        let run = TaskRun {
            job_id,
            task_id,
            task_name,
            prior_attempts,
        };
        self.execute_with_policy(&policy, run, work).await
    }

    /// Run `work` for one task under an already-loaded policy.
    pub async fn execute_with_policy(
        &self,
        policy: &RetryPolicy,
        run: TaskRun<'_>,
        work: &WorkFn,
    ) -> Result<JsonValue, RetryError> {
        let TaskRun {
            job_id,
            task_id,
            task_name,
            prior_attempts,
        } = run;

        self.store
            .set_status(job_id, task_id, TaskStatus::InProgress, None)
            .await?;

        let mut attempt: u32 = 1;
        loop {
            if attempt > 1 {
                let delay = policy.delay_before(attempt);
                debug!(
                    job_id = %job_id,
                    task_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "waiting before next attempt"
                );
                tokio::time::sleep(delay).await;
            }

            if let Err(e) = self
                .store
                .record_attempt(job_id, task_id, prior_attempts + attempt)
                .await
            {
                match self.bookkeeping {
                    AttemptBookkeeping::BestEffort => {
                        warn!(
                            job_id = %job_id,
                            task_name,
                            attempt,
                            error = %e,
                            "failed to record attempt"
                        );
                    }
                    AttemptBookkeeping::Required => {
                        error!(
                            job_id = %job_id,
                            task_name,
                            attempt,
                            error = %e,
                            "failed to record attempt"
                        );
                        let message = format!("could not record attempt {attempt}: {e}");
                        self.store
                            .set_status(job_id, task_id, TaskStatus::Failed, Some(&message))
                            .await?;
                        return Err(RetryError::Store(e));
                    }
                }
            }

            debug!(
                job_id = %job_id,
                task_name,
                attempt,
                max_attempts = policy.max_attempts,
                "starting attempt"
            );

            let err = match work().await {
                Ok(value) => {
                    self.store
                        .set_status(job_id, task_id, TaskStatus::Completed, None)
                        .await?;
                    info!(job_id = %job_id, task_name, attempt, "task completed");
                    return Ok(value);
                }
                Err(err) => err,
            };

            let message = format!("{err:#}");
            match self.classifier.classify(&err) {
                ErrorClass::Immediate => {
                    error!(
                        job_id = %job_id,
                        task_name,
                        attempt,
                        error = %message,
                        "non-retryable failure"
                    );
                    self.store
                        .set_status(job_id, task_id, TaskStatus::Failed, Some(&message))
                        .await?;
                    return Err(RetryError::Immediate {
                        task_name: task_name.to_string(),
                        attempts: attempt,
                        message,
                    });
                }
                ErrorClass::Retryable if policy.is_last_attempt(attempt) => {
                    error!(
                        job_id = %job_id,
                        task_name,
                        attempt,
                        error = %message,
                        "retries exhausted"
                    );
                    let stored = format!("failed after {attempt} attempts: {message}");
                    self.store
                        .set_status(job_id, task_id, TaskStatus::Failed, Some(&stored))
                        .await?;
                    return Err(RetryError::Exhausted {
                        task_name: task_name.to_string(),
                        attempts: attempt,
                        message,
                    });
                }
                ErrorClass::Retryable => {
                    warn!(
                        job_id = %job_id,
                        task_name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %message,
                        "attempt failed; will retry"
                    );
                    attempt += 1;
                }
            }
        }
    }
}
