//! Error types for the generation pipeline.

use std::time::Duration;

use thiserror::Error;

use copyforge_core::JobId;
use copyforge_infra::TaskStoreError;

/// Failures reported by a content-generation provider.
///
/// Work functions that call a provider can return these (inside `anyhow::Error`)
/// so the stock classifier can tell deterministic failures from transient ones.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected credentials: {0}")]
    Authentication(String),

    #[error("provider rejected malformed request: {0}")]
    InvalidRequest(String),

    #[error("provider rate limit hit")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("generated output could not be parsed: {0}")]
    MalformedOutput(String),
}

impl ProviderError {
    /// Map an HTTP status from the provider onto the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => ProviderError::InvalidRequest(message),
            401 | 403 => ProviderError::Authentication(message),
            429 => ProviderError::RateLimited { retry_after: None },
            _ => ProviderError::Http { status, message },
        }
    }
}

/// Terminal outcome of the retry engine for one task.
///
/// Whenever one of these is returned the task record has already been moved to
/// `failed` (except when the store itself failed).
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("task {task_name} failed with a non-retryable error: {message}")]
    Immediate {
        task_name: String,
        attempts: u32,
        message: String,
    },

    #[error("task {task_name} failed after {attempts} attempts: {message}")]
    Exhausted {
        task_name: String,
        attempts: u32,
        message: String,
    },

    #[error("task state could not be persisted: {0}")]
    Store(#[from] TaskStoreError),
}

impl RetryError {
    /// Attempts made in this run before giving up.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Immediate { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                Some(*attempts)
            }
            RetryError::Store(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job {job_id}: no work function registered for tasks {task_names:?}")]
    MissingWork {
        job_id: JobId,
        task_names: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] TaskStoreError),
}
