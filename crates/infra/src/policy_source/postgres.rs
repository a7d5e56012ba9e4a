//! Retry policies read from the `retry_policies` config table.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use copyforge_core::{JobId, RetryPolicy};

use super::{PolicyError, RetryPolicySource};

/// Row key shared by every job without a dedicated policy row.
pub const DEFAULT_POLICY_KEY: &str = "default";

/// Postgres-backed policy source.
///
/// Lookup order: the row keyed by the job id, then the `default` row, then the
/// fallback policy this source was built with.
#[derive(Debug, Clone)]
pub struct PostgresPolicySource {
    pool: Arc<PgPool>,
    fallback: RetryPolicy,
}

impl PostgresPolicySource {
    pub fn new(pool: PgPool, fallback: RetryPolicy) -> Self {
        Self {
            pool: Arc::new(pool),
            fallback,
        }
    }
}

#[async_trait]
impl RetryPolicySource for PostgresPolicySource {
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn load(&self, job_id: JobId) -> Result<RetryPolicy, PolicyError> {
        let row = sqlx::query(
            r#"
            SELECT policy_key, delays_ms, max_attempts
            FROM retry_policies
            WHERE policy_key = $1 OR policy_key = $2
            ORDER BY (policy_key = $2) ASC
            LIMIT 1
            "#,
        )
        .bind(job_id.to_string())
        .bind(DEFAULT_POLICY_KEY)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| PolicyError::Unavailable(format!("load retry policy: {e}")))?;

        let Some(row) = row else {
            debug!("no retry policy rows; using fallback");
            return Ok(self.fallback.clone());
        };

        let key: String = row
            .try_get("policy_key")
            .map_err(|e| PolicyError::Invalid(e.to_string()))?;
        let delays: serde_json::Value = row
            .try_get("delays_ms")
            .map_err(|e| PolicyError::Invalid(e.to_string()))?;
        let max_attempts: i32 = row
            .try_get("max_attempts")
            .map_err(|e| PolicyError::Invalid(e.to_string()))?;

        let policy = parse_policy(delays, max_attempts)?;
        debug!(policy_key = %key, max_attempts = policy.max_attempts, "loaded retry policy");
        Ok(policy)
    }
}

fn parse_policy(delays: serde_json::Value, max_attempts: i32) -> Result<RetryPolicy, PolicyError> {
    let delays_ms: Vec<u64> = serde_json::from_value(delays)
        .map_err(|e| PolicyError::Invalid(format!("delays_ms must be an array of integers: {e}")))?;
    let max_attempts = u32::try_from(max_attempts)
        .map_err(|_| PolicyError::Invalid(format!("max_attempts out of range: {max_attempts}")))?;
    RetryPolicy::from_millis(&delays_ms, max_attempts)
        .map_err(|e| PolicyError::Invalid(e.to_string()))
}
