//! Aggregate progress over a job's execution records.

use serde::{Deserialize, Serialize};

use crate::task::{TaskSnapshot, TaskStatus};

/// Counts per status bucket plus a rounded completion percentage.
///
/// Always derived from the stored records; never a source of truth itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub pending: usize,
    pub percentage: u32,
}

impl ProgressSnapshot {
    pub fn from_snapshots<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskSnapshot>,
    {
        Self::from_statuses(snapshots.into_iter().map(|s| s.status))
    }

    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut progress = Self::default();
        for status in statuses {
            progress.total += 1;
            match status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::InProgress => progress.in_progress += 1,
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed => progress.failed += 1,
            }
        }
        progress.percentage = percentage(progress.completed, progress.total);
        progress
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// `round(100 * completed / total)`, halves rounding up; zero for an empty job.
fn percentage(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * completed + total) / (2 * total)) as u32
}
