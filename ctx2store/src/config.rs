//! Configuration management via environment variables
//!
//! Tunables for the record sink and the capture middleware. The directive
//! tree itself lives in [`crate::scope`].

use std::time::Duration;

/// Get an environment variable, treating an empty value as unset
///
/// # Example
/// ```
/// use ctx2store::config::get_env;
///
/// let level = get_env("CTX2STORE_LOG_LEVEL");
/// ```
pub fn get_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Get an environment variable or a default value
pub fn get_env_or(name: &str, default: &str) -> String {
    get_env(name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable parsed to a specific type
///
/// Unparseable values fall back to `default` with a warning.
pub fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match get_env(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    "Environment variable '{}' has invalid value '{}', using default",
                    name,
                    raw
                );
                default
            }
        },
        None => default,
    }
}

/// Record sink configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    /// Bounded queue capacity per store connection.
    pub queue_capacity: usize,
    /// Total write attempts per operation (first try included).
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubled on each further retry.
    pub retry_backoff: Duration,
    /// Timeout of a single write attempt.
    pub write_timeout: Duration,
    /// How long queued operations may still be written after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            write_timeout: Duration::from_millis(5000),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl SinkConfig {
    /// Load sink configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: get_env_parse("CTX2STORE_QUEUE_CAPACITY", defaults.queue_capacity)
                .max(1),
            retry_attempts: get_env_parse("CTX2STORE_RETRY_ATTEMPTS", defaults.retry_attempts)
                .max(1),
            retry_backoff: Duration::from_millis(get_env_parse(
                "CTX2STORE_RETRY_BACKOFF_MS",
                100u64,
            )),
            write_timeout: Duration::from_millis(get_env_parse(
                "CTX2STORE_WRITE_TIMEOUT_MS",
                5000u64,
            )),
            shutdown_grace: Duration::from_secs(get_env_parse(
                "CTX2STORE_SHUTDOWN_GRACE_SECS",
                5u64,
            )),
        }
    }

    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(1u32 << exp)
    }
}

/// Request capture limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    /// Largest request body (by declared Content-Length) buffered for capture.
    pub max_body_bytes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024,
        }
    }
}

impl CaptureLimits {
    /// Load capture limits from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_body_bytes: get_env_parse(
                "CTX2STORE_MAX_BODY_BYTES",
                Self::default().max_body_bytes,
            ),
        }
    }
}
