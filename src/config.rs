//! Operator configuration
//!
//! Read once from the environment at start-up.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Retry behaviour for optimistic record updates
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempts per mutation before giving up on conflicts
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub base_backoff: Duration,

    /// Upper bound for any single backoff
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-indexed): min(base * 2^attempt, max)
    pub fn backoff(&self, attempt: u32) -> Duration {
        const MAX_SHIFT: u32 = 20;
        let factor = 1u32 << attempt.min(MAX_SHIFT);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Operator-wide settings
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Backends that must report Available for a bucket to be Ready
    pub min_replicas: usize,

    /// Pause every converged bucket, regardless of its own autoPause
    pub auto_pause: bool,

    /// Recreate buckets that disappeared from a backend during Update
    pub recreate_missing_bucket: bool,

    /// Deadline for a single Observe/Create/Update/Delete call
    pub operation_timeout: Duration,

    /// Requeue interval for healthy buckets
    pub poll_interval: Duration,

    /// Lifetime of converged-generation cache entries
    pub bucket_cache_ttl: Duration,

    /// Backend definitions file
    pub backends_config: Option<PathBuf>,

    /// Port of the metrics server
    pub metrics_port: u16,

    pub retry: RetryConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            auto_pause: false,
            recreate_missing_bucket: true,
            operation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(300),
            bucket_cache_ttl: Duration::from_secs(300),
            backends_config: None,
            metrics_port: 8080,
            retry: RetryConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let min_replicas = parse_or(&lookup, "MIN_REPLICAS", defaults.min_replicas)?;
        if min_replicas == 0 {
            return Err(Error::config("MIN_REPLICAS must be greater than 0"));
        }

        Ok(Self {
            min_replicas,
            auto_pause: parse_or(&lookup, "AUTO_PAUSE", defaults.auto_pause)?,
            recreate_missing_bucket: parse_or(
                &lookup,
                "RECREATE_MISSING_BUCKET",
                defaults.recreate_missing_bucket,
            )?,
            operation_timeout: secs_or(&lookup, "OPERATION_TIMEOUT_SECS", defaults.operation_timeout)?,
            poll_interval: secs_or(&lookup, "POLL_INTERVAL_SECS", defaults.poll_interval)?,
            bucket_cache_ttl: secs_or(&lookup, "BUCKET_CACHE_TTL_SECS", defaults.bucket_cache_ttl)?,
            backends_config: lookup("BACKENDS_CONFIG").map(PathBuf::from),
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            retry: defaults.retry,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(lookup, key, default.as_secs())?;
    if secs == 0 {
        return Err(Error::config(format!("{} must be greater than 0", key)));
    }
    Ok(Duration::from_secs(secs))
}
