//! HTTP API: job progress polling and orchestration trigger.

pub mod app;
