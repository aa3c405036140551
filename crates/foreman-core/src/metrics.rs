//! Passive throughput counters fed by the request layer.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    bytes_sent: u64,
    bytes_received: u64,
    total_response_time: Duration,
}

/// Process-wide request counters.
///
/// One logical call is recorded exactly once, no matter how many retry
/// attempts it took. Counters only reset through [`ThroughputMetrics::reset`].
#[derive(Debug, Default)]
pub struct ThroughputMetrics {
    counters: Mutex<Counters>,
}

/// Read-only export of the current counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub avg_response_time_ms: f64,
}

impl ThroughputMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one logical call.
    pub fn record(&self, success: bool, bytes_sent: u64, bytes_received: u64, elapsed: Duration) {
        let mut counters = self.counters.lock().unwrap();
        counters.total_requests += 1;
        if success {
            counters.successful_requests += 1;
        } else {
            counters.failed_requests += 1;
        }
        counters.bytes_sent += bytes_sent;
        counters.bytes_received += bytes_received;
        counters.total_response_time += elapsed;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().unwrap();
        let total = counters.total_requests;
        MetricsSnapshot {
            total_requests: total,
            successful_requests: counters.successful_requests,
            failed_requests: counters.failed_requests,
            success_rate: if total == 0 {
                0.0
            } else {
                counters.successful_requests as f64 / total as f64
            },
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            avg_response_time_ms: if total == 0 {
                0.0
            } else {
                counters.total_response_time.as_secs_f64() * 1000.0 / total as f64
            },
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.counters.lock().unwrap() = Counters::default();
    }
}
