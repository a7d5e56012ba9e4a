//! Process-wide tracing setup shared by the service binaries.

pub mod logging;

pub use logging::{LOG_FORMAT_VAR, LogFormat};

/// Initialize process-wide logging from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
