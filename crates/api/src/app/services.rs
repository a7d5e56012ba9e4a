//! Application services shared by the HTTP handlers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use copyforge_core::{JobId, TaskCatalogue};
use copyforge_infra::{
    AppConfig, InMemoryTaskStore, PostgresPolicySource, PostgresTaskStore, RetryPolicySource,
    StaticPolicySource, StorageConfig, TaskExecutionStore,
};
use copyforge_pipeline::{JobResult, Orchestrator, RetryEngine, WorkMap};

pub type SharedStore = Arc<dyn TaskExecutionStore>;
pub type SharedPolicySource = Arc<dyn RetryPolicySource>;
pub type AppOrchestrator = Orchestrator<SharedStore, SharedPolicySource>;

/// Supplies the unit-of-work functions for a job.
///
/// Embedding applications implement this to bind catalogue task names to calls
/// against their content provider.
pub trait WorkSource: Send + Sync {
    fn work_for(&self, job_id: JobId) -> WorkMap;
}

/// How the last orchestration run of a job ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished(JobResult),
    /// The run stopped before producing a result (store outage, rejected work map).
    Aborted { error: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("no work source is configured on this server")]
    NoWorkSource,

    #[error("job {0} is already being orchestrated")]
    AlreadyRunning(JobId),

    #[error("run registry unavailable")]
    Poisoned,
}

pub struct AppServices {
    store: SharedStore,
    orchestrator: AppOrchestrator,
    work_source: Option<Arc<dyn WorkSource>>,
    running: Mutex<HashSet<JobId>>,
    outcomes: RwLock<HashMap<JobId, RunOutcome>>,
}

impl AppServices {
    pub fn new(store: SharedStore, policies: SharedPolicySource, catalogue: TaskCatalogue) -> Self {
        let engine = RetryEngine::new(store.clone(), policies);
        Self::from_orchestrator(store, Orchestrator::new(engine, catalogue))
    }

    pub fn from_orchestrator(store: SharedStore, orchestrator: AppOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
            work_source: None,
            running: Mutex::new(HashSet::new()),
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_work_source(mut self, work_source: Arc<dyn WorkSource>) -> Self {
        self.work_source = Some(work_source);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn catalogue(&self) -> &TaskCatalogue {
        self.orchestrator.catalogue()
    }

    pub async fn last_outcome(&self, job_id: JobId) -> Option<RunOutcome> {
        self.outcomes.read().await.get(&job_id).cloned()
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(&job_id))
            .unwrap_or(false)
    }

    /// Spawn an orchestration run for `job_id` unless one is already in flight.
    pub fn start_orchestration(self: &Arc<Self>, job_id: JobId) -> Result<(), StartError> {
        let work_source = self.work_source.clone().ok_or(StartError::NoWorkSource)?;

        {
            let mut running = self.running.lock().map_err(|_| StartError::Poisoned)?;
            if !running.insert(job_id) {
                return Err(StartError::AlreadyRunning(job_id));
            }
        }
        let guard = RunGuard {
            services: Arc::clone(self),
            job_id,
        };

        let services = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let work = work_source.work_for(job_id);
            let outcome = match services.orchestrator.orchestrate(job_id, &work).await {
                Ok(result) => RunOutcome::Finished(result),
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "orchestration run failed");
                    RunOutcome::Aborted {
                        error: e.to_string(),
                    }
                }
            };
            services.outcomes.write().await.insert(job_id, outcome);
        });

        Ok(())
    }
}

/// Releases the single-flight slot of a job when its run ends, even on panic.
struct RunGuard {
    services: Arc<AppServices>,
    job_id: JobId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.services.running.lock() {
            running.remove(&self.job_id);
        }
    }
}

/// Build services from configuration: in-memory stores, or Postgres when
/// persistent stores are enabled.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<Arc<AppServices>> {
    let catalogue = TaskCatalogue::marketing_ebook();

    let services = match &config.storage {
        StorageConfig::InMemory => {
            tracing::info!("using in-memory task store");
            let store: SharedStore = Arc::new(InMemoryTaskStore::new());
            let policies: SharedPolicySource =
                Arc::new(StaticPolicySource::new(config.retry_policy.clone()));
            build(store, policies, catalogue, config)
        }
        StorageConfig::Postgres { database_url } => {
            tracing::info!("using postgres task store");
            let pool = PgPool::connect(database_url)
                .await
                .context("failed to connect to Postgres")?;

            let task_store = PostgresTaskStore::new(pool.clone());
            task_store
                .ensure_schema()
                .await
                .context("failed to apply task execution schema")?;

            let store: SharedStore = Arc::new(task_store);
            let policies: SharedPolicySource =
                Arc::new(PostgresPolicySource::new(pool, config.retry_policy.clone()));
            build(store, policies, catalogue, config)
        }
    };

    Ok(Arc::new(services))
}

fn build(
    store: SharedStore,
    policies: SharedPolicySource,
    catalogue: TaskCatalogue,
    config: &AppConfig,
) -> AppServices {
    let engine = RetryEngine::new(store.clone(), policies)
        .with_fallback_policy(config.retry_policy.clone())
        .with_attempt_bookkeeping(config.attempt_bookkeeping);
    AppServices::from_orchestrator(store, Orchestrator::new(engine, catalogue))
}
