//! Resilient HTTP request execution.
//!
//! Every remote call goes through [`RequestRunner`]: a sliding-window rate
//! limit check first, then up to `max_attempts` attempts with exponential
//! backoff and jitter. Metrics see exactly one logical call per `execute`,
//! whatever the attempt count was.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;

use crate::config::Config;
use crate::error::RequestError;
use crate::metrics::ThroughputMetrics;
use crate::rate_limit::SlidingWindowLimiter;

/// Retry schedule for failed attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per logical call, including the first.
    pub max_attempts: u32,
    /// Base delay doubled on each retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following 0-based attempt `attempt`:
    /// `base * 2^attempt` plus up to one second of jitter, capped at
    /// `max_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * f64::powi(2.0, attempt as i32);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        Duration::from_secs_f64((exponential + jitter).min(self.max_delay.as_secs_f64()))
    }
}

/// One outgoing request, described declaratively so retries can replay it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub service: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub retry_on_rate_limit: bool,
}

impl RequestSpec {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            service: "default".to_string(),
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            retry_on_rate_limit: false,
        }
    }

    /// Rate-limit bucket this call draws from.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Treat HTTP 429 from the remote side as retryable for this call.
    pub fn retry_on_rate_limit(mut self) -> Self {
        self.retry_on_rate_limit = true;
        self
    }
}

/// Shared request executor with timeout, retry, rate limiting and metrics.
///
/// Cheap to clone; clones share the same limiter and metrics.
#[derive(Clone)]
pub struct RequestRunner {
    agent: ureq::Agent,
    limiter: Arc<SlidingWindowLimiter>,
    metrics: Arc<ThroughputMetrics>,
    policy: RetryPolicy,
}

impl RequestRunner {
    pub fn new(
        timeout: Duration,
        limiter: Arc<SlidingWindowLimiter>,
        metrics: Arc<ThroughputMetrics>,
        policy: RetryPolicy,
    ) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            limiter,
            metrics,
            policy,
        }
    }

    /// Build a runner wired per `config`, with fresh limiter and metrics.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.request_timeout,
            Arc::new(SlidingWindowLimiter::new(
                config.rate_limit_max_calls,
                config.rate_limit_window,
            )),
            Arc::new(ThroughputMetrics::new()),
            RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: config.retry_base_delay,
                ..RetryPolicy::default()
            },
        )
    }

    /// Throughput counters shared by every clone of this runner.
    pub fn metrics(&self) -> Arc<ThroughputMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Execute one logical call: limiter check, then attempts with backoff.
    pub fn execute(&self, spec: &RequestSpec) -> Result<Value, RequestError> {
        if !self.limiter.try_acquire(&spec.service) {
            // Rejected before any network attempt; still a failed call.
            self.metrics.record(false, 0, 0, Duration::ZERO);
            return Err(RequestError::RateLimitExceeded {
                service: spec.service.clone(),
            });
        }

        let bytes_sent = spec
            .body
            .as_ref()
            .map(|body| body.to_string().len() as u64)
            .unwrap_or(0);
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.send_once(spec) {
                Ok((value, bytes_received)) => {
                    self.metrics
                        .record(true, bytes_sent, bytes_received, start.elapsed());
                    return Ok(value);
                }
                Err(err) => {
                    if should_retry(&err, spec) && attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.backoff_delay(attempt);
                        log::warn!(
                            "request {} {} failed ({}), retrying in {:.2}s",
                            spec.method,
                            spec.url,
                            err,
                            delay.as_secs_f64()
                        );
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    self.metrics.record(false, bytes_sent, 0, start.elapsed());
                    return Err(err);
                }
            }
        }
    }

    fn send_once(&self, spec: &RequestSpec) -> Result<(Value, u64), RequestError> {
        let mut request = self.agent.request(&spec.method, &spec.url);
        for (name, value) in &spec.headers {
            request = request.set(name, value);
        }
        for (name, value) in &spec.query {
            request = request.query(name, value);
        }

        let result = match &spec.body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        match result {
            Ok(response) => {
                let text = response.into_string().map_err(|e| {
                    RequestError::Network(format!("failed to read response body: {e}"))
                })?;
                let bytes_received = text.len() as u64;
                let value = if text.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&text)
                        .map_err(|e| RequestError::Network(format!("invalid JSON response: {e}")))?
                };
                Ok((value, bytes_received))
            }
            Err(ureq::Error::Status(status, response)) => {
                let message = response.into_string().unwrap_or_default();
                Err(RequestError::Remote {
                    status,
                    message: message.chars().take(200).collect(),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(RequestError::Network(transport.to_string()))
            }
        }
    }
}

/// Network failures and 5xx responses are transient; 429 only when the call
/// opted in; everything else is terminal.
fn should_retry(err: &RequestError, spec: &RequestSpec) -> bool {
    match err {
        RequestError::Network(_) => true,
        RequestError::Remote { status, .. } => {
            *status >= 500 || (*status == 429 && spec.retry_on_rate_limit)
        }
        RequestError::RateLimitExceeded { .. } => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================
