//! Task execution state: statuses, durable records and their transition rules.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::catalogue::TaskDefinition;
use crate::error::DomainError;
use crate::id::{JobId, TaskId};

/// Persisted status of one task within one job.
///
/// Lifecycle: `Pending -> InProgress -> (Completed | Failed)`.
///
/// - `Completed` is terminal; nothing moves a task out of it.
/// - `Failed -> InProgress` happens when a job is resumed after a terminal failure.
/// - `InProgress -> InProgress` happens when a run crashed mid-attempt and a later run
///   picks the task up again (attempt state is not resumable mid-attempt).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether the engine leaves a task at rest in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a stored record may move from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Completed, _) => false,
            (_, Pending) => false,
            (Pending, InProgress) => true,
            (InProgress, InProgress | Completed | Failed) => true,
            (Failed, InProgress) => true,
            _ => false,
        }
    }

    /// Check a transition, returning a domain error describing the violation.
    pub fn check_transition(&self, next: TaskStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "task status cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::validation(format!("unknown task status: {other}"))),
        }
    }
}

/// Durable execution record, one per `(job_id, task_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub task_name: String,
    pub status: TaskStatus,
    /// Attempts made for this task across all runs of the job.
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TaskExecutionRecord {
    /// Fresh `pending` record for a catalogue entry.
    pub fn pending(job_id: JobId, definition: &TaskDefinition) -> Self {
        Self {
            job_id,
            task_id: definition.id.clone(),
            task_name: definition.name.clone(),
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            status: self.status,
            attempt_count: self.attempt_count,
        }
    }

    /// Apply a status transition in place.
    ///
    /// `completed` stamps `completed_at` and clears any earlier error; `failed`
    /// keeps the supplied error message.
    pub fn transition(
        &mut self,
        status: TaskStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.status.check_transition(status)?;
        self.status = status;
        match status {
            TaskStatus::Completed => {
                self.completed_at = Some(now);
                self.error_message = None;
            }
            TaskStatus::Failed => self.error_message = error_message,
            TaskStatus::InProgress | TaskStatus::Pending => {
                if error_message.is_some() {
                    self.error_message = error_message;
                }
            }
        }
        Ok(())
    }

    /// Stamp an attempt. The counter never goes backwards.
    pub fn record_attempt(&mut self, attempt_count: u32, now: DateTime<Utc>) {
        self.attempt_count = self.attempt_count.max(attempt_count);
        self.last_attempt_at = Some(now);
    }
}

/// Point-in-time view of a task used for resume decisions and progress.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub attempt_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskExecutionRecord {
        let def = TaskDefinition::new("01", "outline", "Outline").unwrap();
        TaskExecutionRecord::pending(JobId::new(), &def)
    }

    #[test]
    fn forward_transitions_are_allowed() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(InProgress));
    }

    #[test]
    fn completed_never_regresses() {
        use TaskStatus::*;
        for next in [Pending, InProgress, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
        }
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn completing_stamps_timestamp_and_clears_error() {
        let mut r = record();
        let now = Utc::now();
        r.transition(TaskStatus::InProgress, None, now).unwrap();
        r.transition(TaskStatus::Failed, Some("boom".into()), now).unwrap();
        assert_eq!(r.error_message.as_deref(), Some("boom"));

        r.transition(TaskStatus::InProgress, None, now).unwrap();
        r.transition(TaskStatus::Completed, None, now).unwrap();
        assert_eq!(r.completed_at, Some(now));
        assert!(r.error_message.is_none());
    }

    #[test]
    fn attempt_count_is_monotonic() {
        let mut r = record();
        r.record_attempt(3, Utc::now());
        r.record_attempt(2, Utc::now());
        assert_eq!(r.attempt_count, 3);
        assert!(r.last_attempt_at.is_some());
    }

    #[test]
    fn status_parses_from_storage_form() {
        for s in ["pending", "in_progress", "completed", "failed"] {
            assert_eq!(s.parse::<TaskStatus>().unwrap().as_str(), s);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
