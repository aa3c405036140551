//! Orchestrator configuration.
//!
//! Every option is overridable through a `FOREMAN_*` environment variable.
//! The API key and base URL have no sensible defaults and must be provided.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Recognized options for the orchestrator and its request layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote agent service.
    pub api_base_url: String,
    /// API key sent with every request.
    pub api_key: String,
    /// API version segment appended to the base URL.
    pub api_version: String,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Idle time after which an executing worker counts as stuck.
    pub stuck_timeout: Duration,
    /// Timeout applied to each request attempt.
    pub request_timeout: Duration,
    /// Total attempts per logical request, including the first.
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay: Duration,
    /// Calls allowed per service within the rate-limit window.
    pub rate_limit_max_calls: usize,
    /// Length of the sliding rate-limit window.
    pub rate_limit_window: Duration,
    /// Number of recent activities kept in memory per session.
    pub activity_buffer_size: usize,
    /// Page size requested from the activity list endpoint.
    pub activity_page_size: u32,
}

impl Config {
    /// Configuration for a service endpoint with everything else defaulted.
    pub fn new(api_base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            api_key: api_key.into(),
            api_version: "v1alpha".to_string(),
            poll_interval: Duration::from_secs(5),
            stuck_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            rate_limit_max_calls: 60,
            rate_limit_window: Duration::from_secs(60),
            activity_buffer_size: 10,
            activity_page_size: 50,
        }
    }

    /// Load configuration from `FOREMAN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key =
            env::var("FOREMAN_API_KEY").map_err(|_| ConfigError::Missing("FOREMAN_API_KEY"))?;
        let api_base_url = env::var("FOREMAN_API_BASE_URL")
            .map_err(|_| ConfigError::Missing("FOREMAN_API_BASE_URL"))?;

        let mut config = Self::new(api_base_url, api_key);
        if let Ok(version) = env::var("FOREMAN_API_VERSION") {
            config.api_version = version;
        }
        config.poll_interval = Duration::from_secs(env_u64("FOREMAN_POLL_INTERVAL_SECS", 5)?);
        config.stuck_timeout = Duration::from_secs(env_u64("FOREMAN_STUCK_TIMEOUT_SECS", 300)?);
        config.request_timeout = Duration::from_secs(env_u64("FOREMAN_REQUEST_TIMEOUT_SECS", 30)?);
        config.retry_max_attempts = env_u64("FOREMAN_RETRY_ATTEMPTS", 3)? as u32;
        config.retry_base_delay =
            Duration::from_millis(env_u64("FOREMAN_RETRY_BASE_DELAY_MS", 1000)?);
        config.rate_limit_max_calls = env_u64("FOREMAN_RATE_LIMIT_MAX_CALLS", 60)? as usize;
        config.rate_limit_window =
            Duration::from_secs(env_u64("FOREMAN_RATE_LIMIT_WINDOW_SECS", 60)?);
        config.activity_buffer_size = env_u64("FOREMAN_ACTIVITY_BUFFER_SIZE", 10)? as usize;
        config.activity_page_size = env_u64("FOREMAN_ACTIVITY_PAGE_SIZE", 50)? as u32;
        Ok(config)
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
