//! Environment-driven configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use copyforge_core::{AttemptBookkeeping, BackoffStrategy, RetryPolicy};

pub const BIND_ADDR: &str = "COPYFORGE_BIND_ADDR";
pub const USE_PERSISTENT_STORES: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const RETRY_MAX_ATTEMPTS: &str = "COPYFORGE_RETRY_MAX_ATTEMPTS";
pub const RETRY_DELAYS_MS: &str = "COPYFORGE_RETRY_DELAYS_MS";
pub const RETRY_BACKOFF: &str = "COPYFORGE_RETRY_BACKOFF";
pub const RETRY_BASE_DELAY_MS: &str = "COPYFORGE_RETRY_BASE_DELAY_MS";
pub const RETRY_MAX_DELAY_MS: &str = "COPYFORGE_RETRY_MAX_DELAY_MS";
pub const ATTEMPT_BOOKKEEPING: &str = "COPYFORGE_ATTEMPT_BOOKKEEPING";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BASE_DELAY_MS: u64 = 5_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

/// Where execution records and retry policies are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres { database_url: String },
}

/// Process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    /// Policy used when the policy source has no entry or is unavailable.
    pub retry_policy: RetryPolicy,
    pub attempt_bookkeeping: AttemptBookkeeping,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup(BIND_ADDR)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid(BIND_ADDR, e))?;

        let persistent = match lookup(USE_PERSISTENT_STORES) {
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                var: USE_PERSISTENT_STORES,
                reason: format!("expected true/false, got {v}"),
            })?,
            None => false,
        };

        let storage = if persistent {
            let database_url = lookup(DATABASE_URL)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(DATABASE_URL))?;
            StorageConfig::Postgres { database_url }
        } else {
            StorageConfig::InMemory
        };

        let retry_policy = retry_policy(&lookup)?;

        let attempt_bookkeeping = match lookup(ATTEMPT_BOOKKEEPING) {
            Some(v) => v
                .parse::<AttemptBookkeeping>()
                .map_err(|e| invalid(ATTEMPT_BOOKKEEPING, e))?,
            None => AttemptBookkeeping::default(),
        };

        Ok(Self {
            bind_addr,
            storage,
            retry_policy,
            attempt_bookkeeping,
        })
    }
}

/// Explicit delays, or a delay list derived from `COPYFORGE_RETRY_BACKOFF`.
/// Setting both is rejected.
fn retry_policy<F>(lookup: &F) -> Result<RetryPolicy, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = RetryPolicy::default();
    let max_attempts = match lookup(RETRY_MAX_ATTEMPTS) {
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(RETRY_MAX_ATTEMPTS, e))?,
        None => defaults.max_attempts,
    };
    if max_attempts == 0 {
        return Err(invalid(RETRY_MAX_ATTEMPTS, "must be at least 1"));
    }

    let backoff = match lookup(RETRY_BACKOFF) {
        Some(v) => Some(
            v.parse::<BackoffStrategy>()
                .map_err(|e| invalid(RETRY_BACKOFF, e))?,
        ),
        None => None,
    };

    match (backoff, lookup(RETRY_DELAYS_MS)) {
        (Some(_), Some(_)) => Err(invalid(
            RETRY_BACKOFF,
            "cannot be combined with COPYFORGE_RETRY_DELAYS_MS",
        )),
        (Some(strategy), None) => {
            let base = parse_millis(lookup, RETRY_BASE_DELAY_MS, DEFAULT_BASE_DELAY_MS)?;
            let cap = parse_millis(lookup, RETRY_MAX_DELAY_MS, DEFAULT_MAX_DELAY_MS)?;
            Ok(RetryPolicy::with_backoff(strategy, max_attempts, base, cap))
        }
        (None, delays) => {
            let delays_ms = match delays {
                Some(v) => parse_delays(&v)?,
                None => defaults.delays_ms(),
            };
            RetryPolicy::from_millis(&delays_ms, max_attempts)
                .map_err(|e| invalid(RETRY_MAX_ATTEMPTS, e))
        }
    }
}

fn parse_millis<F>(lookup: &F, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let ms = match lookup(var) {
        Some(v) => v.trim().parse::<u64>().map_err(|e| invalid(var, e))?,
        None => default,
    };
    Ok(Duration::from_millis(ms))
}

fn invalid(var: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}

fn parse_delays(v: &str) -> Result<Vec<u64>, ConfigError> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_err(|e| invalid(RETRY_DELAYS_MS, e)))
        .collect()
}
