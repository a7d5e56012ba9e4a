use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use copyforge_api::app::services::{AppServices, WorkSource};
use copyforge_core::{
    JobId, RetryPolicy, TaskCatalogue, TaskExecutionRecord, TaskId, TaskSnapshot, TaskStatus,
};
use copyforge_infra::{InMemoryTaskStore, StaticPolicySource, TaskExecutionStore, TaskStoreError};
use copyforge_pipeline::{WorkMap, work_fn};
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Semaphore;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: Arc<AppServices>) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = copyforge_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Work source whose units of work wait for a permit before producing text.
struct GatedWorkSource {
    catalogue: TaskCatalogue,
    gate: Arc<Semaphore>,
}

impl WorkSource for GatedWorkSource {
    fn work_for(&self, job_id: JobId) -> WorkMap {
        self.catalogue
            .iter()
            .map(|task| {
                let name = task.name.clone();
                let gate = self.gate.clone();
                let work = work_fn(move || {
                    let name = name.clone();
                    let gate = gate.clone();
                    async move {
                        gate.acquire().await?.forget();
                        Ok(json!({ "job": job_id.to_string(), "section": name }))
                    }
                });
                (task.name.clone(), work)
            })
            .collect()
    }
}

/// Store whose backing database is down.
struct UnavailableStore;

fn database_down() -> TaskStoreError {
    TaskStoreError::Storage("database is down".to_string())
}

#[async_trait]
impl TaskExecutionStore for UnavailableStore {
    async fn initialize(
        &self,
        _job_id: JobId,
        _catalogue: &TaskCatalogue,
    ) -> Result<(), TaskStoreError> {
        Err(database_down())
    }

    async fn get_statuses(
        &self,
        _job_id: JobId,
    ) -> Result<BTreeMap<TaskId, TaskSnapshot>, TaskStoreError> {
        Err(database_down())
    }

    async fn get_records(
        &self,
        _job_id: JobId,
    ) -> Result<Vec<TaskExecutionRecord>, TaskStoreError> {
        Err(database_down())
    }

    async fn set_status(
        &self,
        _job_id: JobId,
        _task_id: &TaskId,
        _status: TaskStatus,
        _error_message: Option<&str>,
    ) -> Result<(), TaskStoreError> {
        Err(database_down())
    }

    async fn record_attempt(
        &self,
        _job_id: JobId,
        _task_id: &TaskId,
        _attempt_count: u32,
    ) -> Result<(), TaskStoreError> {
        Err(database_down())
    }
}

fn in_memory_services() -> AppServices {
    AppServices::new(
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(StaticPolicySource::new(RetryPolicy::immediate(2))),
        TaskCatalogue::marketing_ebook(),
    )
}

fn services_with_gate(permits: usize) -> (Arc<AppServices>, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(permits));
    let source = GatedWorkSource {
        catalogue: TaskCatalogue::marketing_ebook(),
        gate: gate.clone(),
    };
    let services = in_memory_services().with_work_source(Arc::new(source));
    (Arc::new(services), gate)
}

async fn wait_for_outcome(
    client: &reqwest::Client,
    base_url: &str,
    job_id: JobId,
) -> (StatusCode, serde_json::Value) {
    // Orchestration runs in the background; poll until the run has ended.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/jobs/{}/result", base_url, job_id))
            .send()
            .await
            .unwrap();

        if res.status() != StatusCode::NOT_FOUND {
            let status = res.status();
            return (status, res.json().await.unwrap());
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("orchestration outcome did not appear within timeout");
}

async fn wait_for_result(
    client: &reqwest::Client,
    base_url: &str,
    job_id: JobId,
) -> serde_json::Value {
    let (status, body) = wait_for_outcome(client, base_url, job_id).await;
    assert_eq!(status, StatusCode::OK, "run did not finish: {body}");
    body
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(Arc::new(in_memory_services())).await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn progress_of_unknown_job_is_all_zero() {
    let srv = TestServer::spawn(Arc::new(in_memory_services())).await;

    let res = reqwest::get(format!("{}/jobs/{}/progress", srv.base_url, JobId::new()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "total": 0,
            "completed": 0,
            "inProgress": 0,
            "failed": 0,
            "pending": 0,
            "percentage": 0,
        })
    );
}

#[tokio::test]
async fn malformed_job_id_is_rejected() {
    let srv = TestServer::spawn(Arc::new(in_memory_services())).await;

    let res = reqwest::get(format!("{}/jobs/not-a-uuid/progress", srv.base_url))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_job_id");
}

#[tokio::test]
async fn orchestrate_without_work_source_is_not_implemented() {
    let srv = TestServer::spawn(Arc::new(in_memory_services())).await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/jobs/{}/orchestrate", srv.base_url, JobId::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn result_of_unknown_job_is_not_found() {
    let srv = TestServer::spawn(Arc::new(in_memory_services())).await;

    let res = reqwest::get(format!("{}/jobs/{}/result", srv.base_url, JobId::new()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn orchestrated_job_completes_and_reports_progress() {
    let (services, _gate) = services_with_gate(Semaphore::MAX_PERMITS);
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();
    let job_id = JobId::new();

    let res = client
        .post(format!("{}/jobs/{}/orchestrate", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: serde_json::Value = res.json().await.unwrap();
    assert_eq!(accepted["job_id"], job_id.to_string());

    let result = wait_for_result(&client, &srv.base_url, job_id).await;
    assert_eq!(result["success"], true);
    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 8);
    assert_eq!(results[0]["task_name"], "outline");
    assert_eq!(results[0]["status"], "completed");
    assert_eq!(results[7]["result"]["section"], "call_to_action");

    let progress: serde_json::Value = client
        .get(format!("{}/jobs/{}/progress", srv.base_url, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress["total"], 8);
    assert_eq!(progress["completed"], 8);
    assert_eq!(progress["percentage"], 100);

    let tasks: serde_json::Value = client
        .get(format!("{}/jobs/{}/tasks", srv.base_url, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tasks = tasks["tasks"].as_array().unwrap();
    let names: Vec<_> = tasks.iter().map(|t| t["task_name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        [
            "outline",
            "title_page",
            "introduction",
            "chapter_one",
            "chapter_two",
            "chapter_three",
            "conclusion",
            "call_to_action",
        ]
    );
    assert!(tasks.iter().all(|t| t["status"] == "completed" && t["attempt_count"] == 1));
}

#[tokio::test]
async fn concurrent_orchestration_of_same_job_is_refused() {
    let (services, gate) = services_with_gate(0);
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();
    let job_id = JobId::new();
    let url = format!("{}/jobs/{}/orchestrate", srv.base_url, job_id);

    let first = client.post(&url).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = client.post(&url).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"], "already_running");

    gate.add_permits(8);
    let result = wait_for_result(&client, &srv.base_url, job_id).await;
    assert_eq!(result["success"], true);

    // Once the run has finished the job can be triggered again; everything is skipped.
    let mut accepted = false;
    for _ in 0..50 {
        let res = client.post(&url).send().await.unwrap();
        if res.status() == StatusCode::ACCEPTED {
            accepted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(accepted, "job stayed locked after its run finished");
}

#[tokio::test]
async fn aborted_run_is_reported_by_result_endpoint() {
    let gate = Arc::new(Semaphore::new(Semaphore::MAX_PERMITS));
    let source = GatedWorkSource {
        catalogue: TaskCatalogue::marketing_ebook(),
        gate,
    };
    let services = AppServices::new(
        Arc::new(UnavailableStore),
        Arc::new(StaticPolicySource::new(RetryPolicy::immediate(2))),
        TaskCatalogue::marketing_ebook(),
    )
    .with_work_source(Arc::new(source));
    let srv = TestServer::spawn(Arc::new(services)).await;
    let client = reqwest::Client::new();
    let job_id = JobId::new();

    let res = client
        .post(format!("{}/jobs/{}/orchestrate", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let (status, body) = wait_for_outcome(&client, &srv.base_url, job_id).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "orchestration_failed");
    assert!(body["message"].as_str().unwrap().contains("database is down"));

    let progress = client
        .get(format!("{}/jobs/{}/progress", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(progress.status(), StatusCode::SERVICE_UNAVAILABLE);
}
