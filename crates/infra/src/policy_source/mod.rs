//! Retry policy sources.
//!
//! The orchestrator asks a `RetryPolicySource` for a job's policy once per run.
//! Sources may be unavailable; callers fall back to a configured default.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use copyforge_core::{JobId, RetryPolicy};

pub use postgres::PostgresPolicySource;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid retry policy: {0}")]
    Invalid(String),
}

/// Supplies the retry policy for a job.
#[async_trait]
pub trait RetryPolicySource: Send + Sync {
    async fn load(&self, job_id: JobId) -> Result<RetryPolicy, PolicyError>;
}

#[async_trait]
impl<S> RetryPolicySource for Arc<S>
where
    S: RetryPolicySource + ?Sized,
{
    async fn load(&self, job_id: JobId) -> Result<RetryPolicy, PolicyError> {
        (**self).load(job_id).await
    }
}

/// Source that hands out the same policy for every job.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource {
    policy: RetryPolicy,
}

impl StaticPolicySource {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl RetryPolicySource for StaticPolicySource {
    async fn load(&self, _job_id: JobId) -> Result<RetryPolicy, PolicyError> {
        Ok(self.policy.clone())
    }
}
