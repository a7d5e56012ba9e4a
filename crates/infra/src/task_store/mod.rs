//! Task execution store boundary.
//!
//! The orchestrator and retry engine read and write execution state only through
//! `TaskExecutionStore`; backends are swapped at construction time.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;
pub use r#trait::{TaskExecutionStore, TaskStoreError};
