//! Batched task orchestration with retries for multi-part content generation.
//!
//! - `retry`: drives one task through its attempt budget.
//! - `orchestrator`: runs a job's catalogue in order, resuming completed work.
//! - `progress`: read-only projection for polling clients.

pub mod classify;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod work;

#[cfg(test)]
mod testing;

pub use classify::{
    ErrorClass, ErrorClassifier, FnClassifier, ProviderErrorClassifier, classify_with,
};
pub use error::{OrchestratorError, ProviderError, RetryError};
pub use orchestrator::{
    JobResult, MissingWorkPolicy, Orchestrator, TaskOutcome, TaskOutcomeStatus,
};
pub use progress::{ProgressReporter, job_progress};
pub use retry::{RetryEngine, TaskRun};
pub use work::{WorkFn, WorkFuture, WorkMap, work_fn};
