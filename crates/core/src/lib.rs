//! `copyforge-core`: domain types for multi-part content generation jobs.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod catalogue;
pub mod error;
pub mod id;
pub mod policy;
pub mod progress;
pub mod task;

pub use catalogue::{TaskCatalogue, TaskDefinition};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, TaskId};
pub use policy::{AttemptBookkeeping, BackoffStrategy, FALLBACK_DELAY, RetryPolicy};
pub use progress::ProgressSnapshot;
pub use task::{TaskExecutionRecord, TaskSnapshot, TaskStatus};
