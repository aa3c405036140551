//! # foreman-core
//!
//! Core orchestration logic for Foreman, a supervisor for remote coding-agent
//! "worker" sessions.
//!
//! The remote service runs the agents; this crate turns its polled activity
//! feed into a reliable local picture:
//!
//! - **Request layer**: retrying, rate-limited HTTP with throughput metrics
//! - **Activity classifier**: raw JSON payloads → typed activities
//! - **Session state machine**: activity streams → worker lifecycle states
//! - **Worker manager**: the session table plus the background polling loop
//! - **Notifications**: ordered observer callbacks for worker events
//!
//! The crate is interface-agnostic: a daemon, an RPC server, or tests drive
//! it through [`WorkerManager`] and the [`ops`] envelope surface.

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod ops;
pub mod rate_limit;
pub mod research;
pub mod session;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use activity::{classify, Activity, ActivityKind, Originator};
pub use client::{AgentApiClient, RequestRunner, RequestSpec, RetryPolicy};
pub use config::Config;
pub use error::{RequestError, WorkerError};
pub use metrics::{MetricsSnapshot, ThroughputMetrics};
pub use notify::NotificationDispatcher;
pub use session::{WorkerManager, WorkerSession, WorkerState, WorkerStatus};
