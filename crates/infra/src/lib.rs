//! Infrastructure layer: execution-state storage, retry policy sources, config.

pub mod config;
pub mod policy_source;
pub mod task_store;

pub use config::{AppConfig, ConfigError, StorageConfig};
pub use policy_source::{PolicyError, PostgresPolicySource, RetryPolicySource, StaticPolicySource};
pub use task_store::{InMemoryTaskStore, PostgresTaskStore, TaskExecutionStore, TaskStoreError};
