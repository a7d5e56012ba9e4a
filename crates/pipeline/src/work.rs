//! Unit-of-work functions supplied by callers, one per catalogue task name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value as JsonValue;

/// Future returned by a unit of work.
pub type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<JsonValue>> + Send>>;

/// Zero-argument async callable performing one task.
///
/// Closures capture whatever payload the task needs. A work function may be invoked
/// several times for one task, so retrying it must not corrupt shared state, and it
/// must fail rather than return a partial result.
pub type WorkFn = Arc<dyn Fn() -> WorkFuture + Send + Sync>;

/// Work functions keyed by `TaskDefinition::name`.
pub type WorkMap = HashMap<String, WorkFn>;

/// Wrap an async closure as a `WorkFn`.
pub fn work_fn<F, Fut>(f: F) -> WorkFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as WorkFuture)
}
