//! Per-worker session state.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityKind};

/// Lifecycle state of a worker session.
///
/// `Planning → WaitingApproval → Executing → {Completed | Failed}`, with
/// `Cancelled` reachable from any non-terminal state via explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Planning,
    WaitingApproval,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl WorkerState {
    /// Terminal states are absorbing: no activity can leave them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Failed | WorkerState::Cancelled
        )
    }

    /// Active sessions are the ones the polling loop keeps watching.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Planning => "PLANNING",
            WorkerState::WaitingApproval => "WAITING_APPROVAL",
            WorkerState::Executing => "EXECUTING",
            WorkerState::Completed => "COMPLETED",
            WorkerState::Failed => "FAILED",
            WorkerState::Cancelled => "CANCELLED",
        };
        write!(f, "{name}")
    }
}

/// One tracked worker session with its derived flags.
///
/// The state is a function of the classified activity stream plus explicit
/// operator actions; it never regresses out of a terminal state.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    pub session_id: String,
    /// Task prompt the worker was created with.
    pub task: String,
    /// Repository locator the worker operates on.
    pub source: String,
    pub title: String,
    pub starting_branch: String,
    pub state: WorkerState,
    pub created_at: DateTime<Utc>,
    pub last_activity_time: DateTime<Utc>,
    /// Identifier of the one outstanding unapproved plan, if any. Non-empty
    /// only while the state is `WaitingApproval`.
    pub pending_plan_id: Option<String>,
    pub error_message: Option<String>,
    buffer: VecDeque<Activity>,
    buffer_capacity: usize,
    seen: HashSet<String>,
}

impl WorkerSession {
    pub fn new(
        session_id: impl Into<String>,
        task: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
        starting_branch: impl Into<String>,
        buffer_capacity: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            task: task.into(),
            source: source.into(),
            title: title.into(),
            starting_branch: starting_branch.into(),
            state: WorkerState::Planning,
            created_at: now,
            last_activity_time: now,
            pending_plan_id: None,
            error_message: None,
            buffer: VecDeque::new(),
            buffer_capacity,
            seen: HashSet::new(),
        }
    }

    /// Most recent buffered activities, oldest first, at most `limit`.
    pub fn recent_activities(&self, limit: usize) -> Vec<Activity> {
        let skip = self.buffer.len().saturating_sub(limit);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    /// Apply one poll cycle's worth of classified activities, in the order
    /// the service returned them. Returns the activities not seen before.
    ///
    /// Rules:
    /// - an error anywhere in the batch forces `Failed`, no matter what
    ///   comes after it;
    /// - otherwise the most recent activity alone decides the next state;
    /// - terminal states absorb: later activities are still buffered, but
    ///   the state and the recorded error stay frozen.
    pub fn apply_batch(&mut self, batch: &[Activity]) -> Vec<Activity> {
        if batch.is_empty() {
            return Vec::new();
        }

        let mut new_activities = Vec::new();
        for activity in batch {
            let key = if activity.id.is_empty() {
                activity.name.clone()
            } else {
                activity.id.clone()
            };
            if !key.is_empty() && !self.seen.insert(key) {
                continue;
            }
            self.buffer.push_back(activity.clone());
            new_activities.push(activity.clone());
        }
        while self.buffer.len() > self.buffer_capacity {
            self.buffer.pop_front();
        }

        if new_activities.is_empty() {
            // The service re-sent a page we had fully processed; nothing to
            // do, and the stuck timer must not be refreshed.
            return new_activities;
        }
        self.last_activity_time = Utc::now();

        if self.state.is_terminal() {
            return new_activities;
        }

        if let Some(error) = batch.iter().find_map(|a| a.error.clone()) {
            self.transition(WorkerState::Failed);
            self.error_message = Some(error);
            return new_activities;
        }

        // Message and unknown kinds are inert.
        let latest = &batch[batch.len() - 1];
        match latest.kind {
            ActivityKind::PlanGenerated => {
                self.transition(WorkerState::WaitingApproval);
                // A second plan before approval is a revision; latest wins.
                self.pending_plan_id = Some(latest.id.clone());
            }
            ActivityKind::PlanApproved => self.transition(WorkerState::Executing),
            ActivityKind::ProgressUpdated => self.transition(WorkerState::Executing),
            ActivityKind::SessionCompleted => self.transition(WorkerState::Completed),
            ActivityKind::UserMessage | ActivityKind::AgentMessage | ActivityKind::Unknown => {}
        }

        new_activities
    }

    fn transition(&mut self, next: WorkerState) {
        self.state = next;
        if next != WorkerState::WaitingApproval {
            self.pending_plan_id = None;
        }
    }

    /// Explicit operator cancellation. Terminal states win; returns whether
    /// anything changed.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(WorkerState::Cancelled);
        true
    }

    /// Local transition after a confirmed plan approval.
    pub fn plan_approved(&mut self) {
        self.transition(WorkerState::Executing);
    }

    /// Local transition after a confirmed plan rejection: back to planning
    /// until the worker proposes a revision.
    pub fn plan_rejected(&mut self) {
        self.transition(WorkerState::Planning);
    }

    /// Whether the session needs operator attention: waiting for approval,
    /// failed, or executing with no activity for longer than `stuck_timeout`.
    pub fn is_blocked(&self, stuck_timeout: Duration) -> bool {
        match self.state {
            WorkerState::WaitingApproval | WorkerState::Failed => true,
            WorkerState::Executing => self.seconds_since_activity() > stuck_timeout.as_secs() as i64,
            _ => false,
        }
    }

    /// Human-readable reason for [`is_blocked`](Self::is_blocked), if any.
    pub fn blocker_reason(&self, stuck_timeout: Duration) -> Option<String> {
        match self.state {
            WorkerState::WaitingApproval => {
                Some("Plan generated, waiting for approval".to_string())
            }
            WorkerState::Failed => Some(format!(
                "Failed: {}",
                self.error_message.as_deref().unwrap_or("Unknown error")
            )),
            WorkerState::Executing => {
                let idle = self.seconds_since_activity();
                if idle > stuck_timeout.as_secs() as i64 {
                    Some(format!(
                        "No activity for {} minutes (potentially stuck)",
                        idle / 60
                    ))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn seconds_since_activity(&self) -> i64 {
        (Utc::now() - self.last_activity_time).num_seconds()
    }
}

// ============================================================================
// TESTS
// ============================================================================
