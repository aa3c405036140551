//! Worker session tracking and orchestration.
//!
//! A worker is one session on the remote agent service. The state machine
//! lives in [`state`]; [`manager`] owns the session table and the background
//! polling loop that keeps it current.

mod manager;
mod state;

pub use manager::{WorkerManager, WorkerStatus};
pub use state::{WorkerSession, WorkerState};
