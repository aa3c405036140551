//! Error taxonomy for remote calls and worker operations.

use thiserror::Error;

use crate::session::WorkerState;

/// Errors produced by the resilient request layer.
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    /// Transport-level failure: connection refused, DNS, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The remote service answered with a non-2xx status.
    #[error("remote service returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// The local sliding-window limiter rejected the call before dispatch.
    #[error("rate limit exceeded for service '{service}'")]
    RateLimitExceeded { service: String },
}

/// Errors surfaced by orchestrator operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("worker {session_id} cannot accept this operation in state {state}")]
    InvalidState {
        session_id: String,
        state: WorkerState,
    },

    #[error("malformed create response: {0}")]
    Creation(String),

    #[error(transparent)]
    Request(#[from] RequestError),
}
