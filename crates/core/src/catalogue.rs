//! Task registry: the fixed, ordered catalogue of generation tasks.
//!
//! The catalogue order is the execution order. A catalogue is immutable once built
//! and is handed to the orchestrator at construction time.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TaskId;

/// One catalogue entry.
///
/// `id` is the identity persisted with each execution record; `name` is the key
/// callers use to supply the unit-of-work function for this task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub name: String,
    pub description: String,
}

impl TaskDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("task name must not be empty"));
        }
        Ok(Self {
            id: TaskId::new(id)?,
            name,
            description: description.into(),
        })
    }
}

/// Ordered, read-only list of task definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCatalogue {
    tasks: Vec<TaskDefinition>,
}

impl TaskCatalogue {
    /// Build a catalogue, rejecting duplicate ids or names.
    pub fn new(tasks: Vec<TaskDefinition>) -> DomainResult<Self> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for task in &tasks {
            if !ids.insert(task.id.clone()) {
                return Err(DomainError::validation(format!(
                    "duplicate task id in catalogue: {}",
                    task.id
                )));
            }
            if !names.insert(task.name.as_str()) {
                return Err(DomainError::validation(format!(
                    "duplicate task name in catalogue: {}",
                    task.name
                )));
            }
        }
        Ok(Self { tasks })
    }

    /// The stock catalogue for a long-form marketing e-book.
    ///
    /// Ids are zero-padded so lexical order matches execution order.
    pub fn marketing_ebook() -> Self {
        const ENTRIES: &[(&str, &str, &str)] = &[
            ("01", "outline", "Plan the e-book structure and chapter goals"),
            ("02", "title_page", "Title, subtitle and tagline"),
            ("03", "introduction", "Opening section framing the reader's problem"),
            ("04", "chapter_one", "First body chapter"),
            ("05", "chapter_two", "Second body chapter"),
            ("06", "chapter_three", "Third body chapter"),
            ("07", "conclusion", "Summary of the key takeaways"),
            ("08", "call_to_action", "Closing offer and next steps for the reader"),
        ];

        let tasks = ENTRIES
            .iter()
            .map(|(id, name, description)| TaskDefinition {
                id: TaskId(id.to_string()),
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect();
        Self { tasks }
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }
}

impl<'a> IntoIterator for &'a TaskCatalogue {
    type Item = &'a TaskDefinition;
    type IntoIter = std::slice::Iter<'a, TaskDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}
