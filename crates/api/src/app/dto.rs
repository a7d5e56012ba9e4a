use chrono::{DateTime, Utc};
use serde::Serialize;

use copyforge_core::{TaskExecutionRecord, TaskStatus};

#[derive(Debug, Serialize)]
pub struct OrchestrationAccepted {
    pub job_id: String,
    pub message: String,
}

/// One catalogue entry with its execution state.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub task_name: String,
    pub description: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TaskView {
    pub fn from_record(record: TaskExecutionRecord, description: &str) -> Self {
        Self {
            task_id: record.task_id.to_string(),
            task_name: record.task_name,
            description: description.to_string(),
            status: record.status,
            attempt_count: record.attempt_count,
            last_attempt_at: record.last_attempt_at,
            completed_at: record.completed_at,
            error_message: record.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobTasksResponse {
    pub job_id: String,
    pub running: bool,
    pub tasks: Vec<TaskView>,
}
